//! Command implementations for the zipvault CLI.

pub mod convert;
pub mod create;
pub mod detect;
pub mod extract;
pub mod list;
pub mod test;

pub use convert::cmd_convert;
pub use create::{CompressionArg, CreateOptions, EncryptionArg, cmd_create, resolve_writer_options};
pub use detect::cmd_detect;
pub use extract::{ExtractOptions, cmd_extract, default_output};
pub use list::{ListOptions, cmd_list};
pub use test::cmd_test;
