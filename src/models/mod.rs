pub mod address;
pub mod cart;

pub use address::{ShippingAddress, ShippingField, ShippingForm};
pub use cart::{Cart, CartLine, VariantSelection};
