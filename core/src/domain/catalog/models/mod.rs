pub mod customer;
pub mod integration;
pub mod location;
pub mod order;
pub mod payment;
pub mod product;
pub mod promotion;
pub mod report;
pub mod support;

pub use customer::Customer;
pub use integration::Integration;
pub use location::Location;
pub use order::{Address, Order, OrderProduct, OrderStatus};
pub use payment::Payment;
pub use product::Product;
pub use promotion::Promotion;
pub use report::Report;
pub use support::Support;
