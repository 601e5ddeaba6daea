pub mod detect;
pub mod extract;
pub mod format;
pub mod index;
pub mod stream;
pub mod walker;
