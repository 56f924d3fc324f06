//! Shapes shared by the unit tests.
#![allow(dead_code)]
use crate::{decl_capability, Shape};

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Simple {
    pub id: u64,
    pub name: String,
}

impl Simple {
    pub fn new(id: u64, name: &str) -> Self {
        Simple {
            id,
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct SimpleDto {
    pub id: u64,
    pub name: String,
    pub extra: String,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Renamed {
    pub id: u64,
    pub dest_name: String,
}

pub trait Named {
    fn name(&self) -> String;
}

pub trait Identified {
    fn id(&self) -> u64;
}

decl_capability! {
    Named {
        name: String,
    }
}

decl_capability! {
    Identified {
        id: u64,
    }
}

#[derive(Clone, Debug, Default, Shape)]
#[mapper(capabilities(Named, Identified))]
pub struct Person {
    pub id: u64,
    pub name: String,
    pub age: u32,
}

impl Person {
    pub fn new(id: u64, name: &str, age: u32) -> Self {
        Person {
            id,
            name: name.into(),
            age,
        }
    }
}

impl Named for Person {
    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Identified for Person {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Declares the same capabilities as [Person], in the other order.
#[derive(Clone, Debug, Default, Shape)]
#[mapper(capabilities(Identified, Named))]
pub struct Robot {
    pub serial: u64,
    pub model: String,
}

impl Robot {
    pub fn new(serial: u64, model: &str) -> Self {
        Robot {
            serial,
            model: model.into(),
        }
    }
}

impl Named for Robot {
    fn name(&self) -> String {
        self.model.clone()
    }
}

impl Identified for Robot {
    fn id(&self) -> u64 {
        self.serial
    }
}

/// Only identifiable.
#[derive(Clone, Debug, Default, Shape)]
#[mapper(capabilities(Identified))]
pub struct Tag {
    pub id: u64,
}

impl Identified for Tag {
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Badge {
    pub id: u64,
    pub name: String,
    pub label: String,
}

#[derive(Clone, Debug, Default, Shape)]
pub struct Plain {
    pub id: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Narrow {
    pub count: u32,
    pub ratio: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Wide {
    pub count: u64,
    pub ratio: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Line {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct Order {
    pub id: u64,
    pub customer: String,
    pub lines: Vec<Line>,
    pub total: f64,
    pub note: String,
}

#[derive(Clone, Debug, Default, PartialEq, Shape)]
pub struct OrderDto {
    pub id: u64,
    pub customer: String,
    pub lines: Vec<Line>,
    #[mapper(readonly)]
    pub total: f64,
    pub note: String,
    pub status: String,
}

/// Stand-ins for types generated by a lazy-loading layer.
pub mod lazy_proxies {
    use super::Simple;
    use crate::Shape;

    #[derive(Clone, Debug, Shape)]
    pub struct SimpleProxy {
        #[mapper(proxy_of)]
        pub inner: Simple,
        pub loaded: bool,
    }

    impl SimpleProxy {
        pub fn new(inner: Simple) -> Self {
            SimpleProxy {
                inner,
                loaded: false,
            }
        }
    }
}
