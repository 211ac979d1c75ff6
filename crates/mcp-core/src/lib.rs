pub mod content;
pub use content::{Content, ImageContent, TextContent};
pub mod protocol;
pub mod role;
pub use role::Role;
pub mod tool;
pub use tool::Tool;
