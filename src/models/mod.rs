pub mod course;
pub mod document;
pub mod knowledge;
pub mod subtitle;

pub use course::*;
pub use document::*;
pub use knowledge::*;
pub use subtitle::*;
