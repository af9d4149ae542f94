pub mod checkout;
pub mod payments;
pub mod pricing;
pub mod shipping;
