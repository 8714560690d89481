pub mod eastmoney;
pub mod gated;
pub mod sina;
pub mod util;

pub use eastmoney::EastmoneyProvider;
pub use gated::GatedProvider;
pub use sina::SinaQuoteClient;
