//! Fixed limits, reserved names, and defaults shared across the catalog.

/// Name of the root group.
pub const ROOT_GROUP_NAME: &str = "/";

/// Maximum length of any entity name, in bytes.
pub const MAX_NAME: usize = 256;
/// Maximum number of dimensions per variable.
pub const MAX_VAR_DIMS: usize = 1024;
/// Largest group id that still fits the low half of a handle.
pub const MAX_GROUP_ID: usize = 0xffff;

/// Highest atomic type id; user-defined ids start at [`FIRST_USER_TYPE_ID`].
pub const MAX_ATOMIC_TYPE: usize = 12;
pub const FIRST_USER_TYPE_ID: usize = 32;

/// Largest variable read back in one piece, in bytes.
pub const MAX_VAR_BYTES: usize = 1 << 31;

/// Largest allowed deflate level.
pub const MAX_DEFLATE_LEVEL: u32 = 9;

pub const MEGABYTE: usize = 1_048_576;
pub const DEFAULT_CHUNK_CACHE_SIZE: usize = 16 * MEGABYTE;
pub const DEFAULT_CHUNK_CACHE_NELEMS: usize = 4133;
pub const DEFAULT_CHUNK_CACHE_PREEMPTION: f32 = 0.75;

/// Attribute holding the per-variable fill value.
pub const FILL_VALUE_ATT: &str = "_FillValue";
/// Root attribute recording library provenance.
pub const NCPROPS_ATT: &str = "_NCProperties";
pub const NCPROPS_VERSION: u32 = 2;

/// File extension of catalog images written by the file backend.
pub const IMAGE_EXTENSION: &str = "ncim";

// NC_FILL_* defaults
pub const FILL_BYTE: i8 = -127;
pub const FILL_CHAR: u8 = 0;
pub const FILL_SHORT: i16 = -32767;
pub const FILL_INT: i32 = -2147483647;
pub const FILL_FLOAT: f32 = 9.969_21e36;
pub const FILL_DOUBLE: f64 = 9.969_209_968_386_869e36;
pub const FILL_UBYTE: u8 = 255;
pub const FILL_USHORT: u16 = 65535;
pub const FILL_UINT: u32 = 4_294_967_295;
pub const FILL_INT64: i64 = -9_223_372_036_854_775_806;
pub const FILL_UINT64: u64 = 18_446_744_073_709_551_614;
pub const FILL_STRING: &str = "";
