fn main() -> anyhow::Result<()> {
    ncmeta_cli::run()
}
