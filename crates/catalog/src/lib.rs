//! Catalog module: the product view the cart/order engine depends on.
//!
//! Browsing, categories and search live outside this workspace; only the
//! attributes that affect stock accounting, pricing and packaging are
//! modelled here.

pub mod packaging;
pub mod product;

pub use packaging::{PackagingSizer, StackingSizer};
pub use product::{Dimensions, Product};
