use anyhow::{anyhow, Error, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use ncmeta::model::{Attribute, GroupId};
use ncmeta::{Config, NcFile, NcValues};
use serde_json::{json, Value};
use std::env::current_dir;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "ncmeta.json";

#[derive(Debug, Parser)]
#[command(name = "ncmeta")]
#[command(about = "Catalog image inspector")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Configuration file, defaults to ./ncmeta.json when present
    #[clap(long, short, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file to the working directory.
    Init {
        /// Replace an existing configuration file
        #[clap(long, default_value = "false")]
        overwrite: bool,
    },
    /// Print the configuration in effect.
    Show,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new catalog image
    Create {
        /// Path of the image to create
        path: PathBuf,
        /// Dimensions to define, as NAME=LEN or NAME=unlimited
        #[clap(long = "dim", num_args = 1..)]
        dims: Vec<String>,
        /// Global text attributes, as NAME=VALUE
        #[clap(long = "att", num_args = 1..)]
        atts: Vec<String>,
        /// Build the catalog in memory and write it once on close
        #[clap(long, action, default_value = "false")]
        in_memory: bool,
    },
    /// Print a summary of a catalog image
    Info {
        path: PathBuf,
    },
    /// Print the schema of a catalog image
    Dump {
        path: PathBuf,
        /// Emit JSON instead of the text listing
        #[clap(long, action, default_value = "false")]
        json: bool,
        /// Include variable data
        #[clap(long, action, default_value = "false")]
        data: bool,
    },
    /// List catalog images below a directory
    Scan {
        /// Directory to search, defaults to the current directory
        dir: Option<PathBuf>,
        /// Glob patterns relative to the directory, defaults to ['**/*.ncim']
        #[clap(long, short, num_args = 1..)]
        includes: Vec<String>,
    },
    /// Prints the version of the ncmeta binary
    Version,
    /// Manage the ncmeta configuration file.
    #[command(subcommand)]
    Config(ConfigCommands),
}

pub fn run() -> Result<()> {
    ncmeta::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    ncmeta::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => current_dir()?.join(CONFIG_FILE),
    };
    if path.exists() {
        info!("Loading configuration from {}", path.display());
        return Ok(Config::from_file(&path)?);
    }
    if explicit.is_some() {
        return Err(anyhow!("Configuration file {} not found", path.display()));
    }
    Ok(Config::default())
}

fn execute(cmd: Cli) -> Result<()> {
    // NCMETA_LOG is copied to RUST_LOG by `init_logging`; the flags win over both.
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let config = load_config(cmd.config.as_deref())?;

    match cmd.command {
        Commands::Create {
            path,
            dims,
            atts,
            in_memory,
        } => {
            if path.exists() {
                return Err(anyhow!("{} already exists", path.display()));
            }
            let config = Config {
                path: Some(path.clone()),
                read_only: false,
                in_memory,
                diskless: false,
                persist: in_memory,
                ..config
            };
            let mut file = NcFile::create(config)?;
            for spec in &dims {
                let (name, len) = parse_dim(spec)?;
                file.add_dimension(0, name, len)?;
            }
            for spec in &atts {
                let (name, value) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Attribute must be NAME=VALUE, got '{}'", spec))?;
                file.put_att_text(0, None, name, value)?;
            }
            file.enddef()?;
            file.close()?;
            println!("Created {}", path.display());
        }
        Commands::Info { path } => {
            let file = open_read_only(&config, &path)?;
            println!("{}", file.summary());
        }
        Commands::Dump { path, json, data } => {
            let file = open_read_only(&config, &path)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "catalog".to_string());
            if json {
                let value = group_json(&file, 0, data)?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print!("{}", cdl(&file, &name, data)?);
            }
        }
        Commands::Scan { dir, includes } => {
            let root = match dir {
                Some(d) => d,
                None => current_dir()?,
            };
            let images = ncmeta::util::find_images(&root, &includes)?;
            for image in &images {
                let size = std::fs::metadata(image).map(|m| m.len()).unwrap_or(0);
                match open_read_only(&config, image) {
                    Ok(file) => {
                        let s = file.summary();
                        println!(
                            "{}  {}  {} groups, {} variables",
                            image.display(),
                            pretty_bytes::converter::convert(size as f64),
                            s.groups,
                            s.vars
                        );
                    }
                    Err(e) => {
                        warn!("Cannot open {}: {}", image.display(), e);
                        println!("{}  unreadable", image.display());
                    }
                }
            }
            println!(
                "{} images, {}",
                images.len(),
                pretty_bytes::converter::convert(ncmeta::util::total_size(&images) as f64)
            );
        }
        Commands::Version => {
            println!("ncmeta {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Config(config_cmd) => handle_config_command(config_cmd, config)?,
    }

    Ok(())
}

fn handle_config_command(config_cmd: ConfigCommands, config: Config) -> Result<()> {
    match config_cmd {
        ConfigCommands::Init { overwrite } => {
            let path = current_dir()?.join(CONFIG_FILE);
            if path.exists() && !overwrite {
                println!("A configuration file already exists at {}", path.display());
                println!("Use --overwrite to replace it.");
                return Ok(());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
        ConfigCommands::Show => {
            config.print();
        }
    }
    Ok(())
}

fn open_read_only(config: &Config, path: &Path) -> Result<NcFile> {
    if !path.exists() {
        return Err(anyhow!("{} not found", path.display()));
    }
    let config = Config {
        path: Some(path.to_path_buf()),
        read_only: true,
        in_memory: false,
        diskless: false,
        persist: false,
        ..config.clone()
    };
    Ok(NcFile::open(config)?)
}

/// Parses `NAME=LEN` or `NAME=unlimited`.
fn parse_dim(spec: &str) -> Result<(&str, Option<usize>)> {
    let (name, len) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Dimension must be NAME=LEN, got '{}'", spec))?;
    if len.eq_ignore_ascii_case("unlimited") {
        return Ok((name, None));
    }
    let len = len
        .parse::<usize>()
        .map_err(|_| anyhow!("Invalid length for dimension {}: {}", name, len))?;
    Ok((name, Some(len)))
}

fn type_name(file: &NcFile, type_id: usize) -> String {
    file.resolve_type(type_id)
        .map(|t| t.name().to_string())
        .unwrap_or_else(|_| format!("<type {}>", type_id))
}

fn att_line(file: &NcFile, owner: &str, att: &Attribute) -> String {
    let ty = match att.data {
        NcValues::Char(_) => String::new(),
        _ => format!("{} ", type_name(file, att.type_id)),
    };
    format!("{}{}:{} = {} ;", ty, owner, att.hdr.name, att.data.render())
}

fn cdl(file: &NcFile, name: &str, data: bool) -> Result<String> {
    let mut out = format!("netcdf {} {{\n", name);
    cdl_group(file, 0, 0, data, &mut out)?;
    out.push_str("}\n");
    Ok(out)
}

fn cdl_group(file: &NcFile, gid: GroupId, depth: usize, data: bool, out: &mut String) -> Result<()> {
    let pad = "  ".repeat(depth);
    let group = file.find_group(gid)?;
    let graph = file.graph();

    if !group.types.is_empty() {
        out.push_str(&format!("{}types:\n", pad));
        for h in group.types.iter() {
            let class = format!("{:?}", file.type_class(h.id)?).to_lowercase();
            out.push_str(&format!("{}  {} {} ;\n", pad, class, h.name));
        }
    }
    if !group.dims.is_empty() {
        out.push_str(&format!("{}dimensions:\n", pad));
        for h in group.dims.iter() {
            let Some(dim) = graph.dim(h.id) else { continue };
            if dim.unlimited {
                out.push_str(&format!(
                    "{}  {} = UNLIMITED ; // ({} currently)\n",
                    pad, dim.hdr.name, dim.len
                ));
            } else {
                out.push_str(&format!("{}  {} = {} ;\n", pad, dim.hdr.name, dim.len));
            }
        }
    }
    if !group.vars.is_empty() {
        out.push_str(&format!("{}variables:\n", pad));
        for var in group.vars.iter() {
            let dims: Vec<String> = var
                .dimids
                .iter()
                .map(|d| {
                    graph
                        .dim(*d)
                        .map(|dim| dim.hdr.name.clone())
                        .unwrap_or_else(|| d.to_string())
                })
                .collect();
            let shape = if dims.is_empty() {
                String::new()
            } else {
                format!("({})", dims.join(", "))
            };
            out.push_str(&format!(
                "{}  {} {}{} ;\n",
                pad,
                type_name(file, var.type_id),
                var.hdr.name,
                shape
            ));
            for att in var.atts.iter() {
                out.push_str(&format!("{}    {}\n", pad, att_line(file, &var.hdr.name, att)));
            }
        }
    }
    if !group.atts.is_empty() || (gid == 0 && file.provenance().is_some()) {
        out.push_str(&format!("\n{}// group attributes:\n", pad));
        for att in group.atts.iter().chain(file.provenance().filter(|_| gid == 0)) {
            out.push_str(&format!("{}    {}\n", pad, att_line(file, "", att)));
        }
    }
    if data && !group.vars.is_empty() {
        out.push_str(&format!("{}data:\n", pad));
        for (varid, var) in group.vars.iter().enumerate() {
            let values = file.get_var(gid, varid)?;
            out.push_str(&format!("{}  {} = {} ;\n", pad, var.hdr.name, values.render()));
        }
    }
    for h in group.children.iter() {
        out.push_str(&format!("\n{}group: {} {{\n", pad, h.name));
        cdl_group(file, h.id, depth + 1, data, out)?;
        out.push_str(&format!("{}  }} // group {}\n", pad, h.name));
    }
    Ok(())
}

fn att_json(file: &NcFile, att: &Attribute) -> Value {
    json!({
        "name": att.hdr.name,
        "type": type_name(file, att.type_id),
        "len": att.len,
        "value": att.data,
    })
}

fn group_json(file: &NcFile, gid: GroupId, data: bool) -> Result<Value> {
    let group = file.find_group(gid)?;
    let graph = file.graph();
    let dims: Vec<Value> = group
        .dims
        .iter()
        .filter_map(|h| graph.dim(h.id))
        .map(|d| json!({"id": d.hdr.id, "name": d.hdr.name, "len": d.len, "unlimited": d.unlimited}))
        .collect();
    let types: Vec<Value> = group
        .types
        .iter()
        .map(|h| {
            let class = file
                .type_class(h.id)
                .map(|c| format!("{:?}", c).to_lowercase())
                .unwrap_or_default();
            json!({"id": h.id, "name": h.name, "class": class})
        })
        .collect();
    let mut vars = Vec::with_capacity(group.vars.len());
    for (varid, var) in group.vars.iter().enumerate() {
        let mut v = json!({
            "id": varid,
            "name": var.hdr.name,
            "type": type_name(file, var.type_id),
            "dimids": var.dimids,
            "attributes": var.atts.iter().map(|a| att_json(file, a)).collect::<Vec<_>>(),
        });
        if data {
            v["data"] = serde_json::to_value(file.get_var(gid, varid)?)?;
        }
        vars.push(v);
    }
    let mut atts: Vec<Value> = group.atts.iter().map(|a| att_json(file, a)).collect();
    if gid == 0 {
        if let Some(p) = file.provenance() {
            atts.push(att_json(file, p));
        }
    }
    let mut children = Vec::new();
    for h in group.children.iter() {
        children.push(group_json(file, h.id, data)?);
    }
    Ok(json!({
        "name": group.hdr.name,
        "path": file.full_name(gid)?,
        "types": types,
        "dimensions": dims,
        "variables": vars,
        "attributes": atts,
        "groups": children,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_parse() {
        assert_eq!(parse_dim("x=4").unwrap(), ("x", Some(4)));
        assert_eq!(parse_dim("time=UNLIMITED").unwrap(), ("time", None));
        assert!(parse_dim("x").is_err());
        assert!(parse_dim("x=-1").is_err());
    }
}
