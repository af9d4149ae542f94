pub mod order;
pub mod order_item;
pub mod shipping_info;

pub use order::{Entity as Order, OrderStatus, PaymentMethod, ShippingType};
pub use order_item::Entity as OrderItem;
pub use shipping_info::Entity as ShippingInfo;
