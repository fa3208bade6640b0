use super::Shape;
use std::sync::Arc;

/// Index of a shape within its Provider. Shape identity is the pair of the
/// provider's own identity and this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u32);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("shape {0} was declared but never defined")]
    Undefined(u32),
    #[error("shape {0} was defined twice")]
    Redefined(u32),
}

/// Provider is an immutable, append-only arena of shapes. Engines key
/// converter caches by provider identity (its allocation address) plus
/// ShapeId, so two references to the same shape always reuse one converter.
#[derive(Debug)]
pub struct Provider {
    shapes: Vec<Shape>,
}

impl Provider {
    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShapeId, &Shape)> {
        self.shapes
            .iter()
            .enumerate()
            .map(|(at, shape)| (ShapeId(at as u32), shape))
    }
}

/// ProviderBuilder assembles a shape arena. Recursive type graphs declare
/// ids up front and define them once their children's ids exist.
#[derive(Debug, Default)]
pub struct ProviderBuilder {
    shapes: Vec<Option<Shape>>,
}

impl ProviderBuilder {
    pub fn new() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// Reserve an id for a shape defined later.
    pub fn declare(&mut self) -> ShapeId {
        self.shapes.push(None);
        ShapeId(self.shapes.len() as u32 - 1)
    }

    /// Fill in a previously declared id.
    pub fn define(&mut self, id: ShapeId, shape: Shape) -> Result<(), Error> {
        match self.shapes.get_mut(id.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(shape);
                Ok(())
            }
            _ => Err(Error::Redefined(id.0)),
        }
    }

    /// Declare and define in one step.
    pub fn add(&mut self, shape: Shape) -> ShapeId {
        self.shapes.push(Some(shape));
        ShapeId(self.shapes.len() as u32 - 1)
    }

    pub fn finish(self) -> Result<Arc<Provider>, Error> {
        let mut shapes = Vec::with_capacity(self.shapes.len());
        for (at, slot) in self.shapes.into_iter().enumerate() {
            match slot {
                Some(shape) => shapes.push(shape),
                None => return Err(Error::Undefined(at as u32)),
            }
        }
        Ok(Arc::new(Provider { shapes }))
    }
}

#[cfg(test)]
mod test {
    use super::super::{ObjectShape, Property, Scalar, Shape};
    use super::*;

    #[test]
    fn test_forward_declaration() {
        let mut builder = ProviderBuilder::new();

        // A self-referential "node" type: declare first, wire the id into a
        // property, then define.
        let node = builder.declare();
        let next = builder.add(Shape::optional("Option<Node>", node));
        builder
            .define(
                node,
                Shape::object("Node", ObjectShape::new(vec![Property::new("next", next)])),
            )
            .unwrap();

        let provider = builder.finish().unwrap();
        assert_eq!(provider.len(), 2);
        assert_eq!(provider.get(node).unwrap().name, "Node");
    }

    #[test]
    fn test_undefined_declaration_is_an_error() {
        let mut builder = ProviderBuilder::new();
        builder.add(Shape::scalar("i32", Scalar::I32));
        let dangling = builder.declare();
        assert_eq!(dangling, ShapeId(1));

        assert!(matches!(builder.finish(), Err(Error::Undefined(1))));
    }
}
