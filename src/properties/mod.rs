//! Service configuration properties.
//!
//! This module groups the property **data model** used to configure a
//! service instance at creation time.
//!
//! ## Contents
//! - [`PropertyValue`] tagged scalar value (string, integer, boolean, float)
//! - [`PropertyBag`] ordered key → value mapping with typed, fallible reads

mod bag;

pub use bag::{PropertyBag, PropertyValue};
