pub mod console;
pub mod keyboard;
pub mod store;

pub use console::ConsoleSink;
pub use keyboard::StdinKeyboard;
pub use store::RamStore;
