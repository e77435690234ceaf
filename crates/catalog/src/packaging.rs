//! Packaging sizing hook.
//!
//! Delivery pricing needs a bounding box for the whole shipment. The real
//! sizing logic is an external collaborator; `StackingSizer` is the default
//! used when nothing smarter is configured.

use rust_decimal::Decimal;

use crate::product::{Dimensions, Product};

/// Computes the bounding box needed to ship a set of (product, quantity) pairs.
pub trait PackagingSizer: Send + Sync {
    fn package_dimensions(&self, items: &[(&Product, Decimal)]) -> Dimensions;
}

/// Stacks units on top of each other: the footprint is the largest unit
/// footprint, the height is the sum of unit heights.
///
/// Fractional quantities (goods sold by weight) are rounded up to whole units.
#[derive(Debug, Default, Clone, Copy)]
pub struct StackingSizer;

impl PackagingSizer for StackingSizer {
    fn package_dimensions(&self, items: &[(&Product, Decimal)]) -> Dimensions {
        items
            .iter()
            .fold(Dimensions::default(), |acc, (product, quantity)| {
                let d = product.dimensions;
                Dimensions {
                    length: acc.length.max(d.length),
                    width: acc.width.max(d.width),
                    height: acc.height + d.height * quantity.ceil(),
                }
            })
    }
}
