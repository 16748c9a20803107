pub mod load;
pub mod driver;
pub mod blast;
pub mod events;

pub use load::*;
pub use driver::*;
pub use blast::*;
pub use events::*;

