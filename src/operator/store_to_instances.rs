use crate::schema::ArraySchema;

/// `store_to_instances(input)`: passes its single input through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreToInstances;

impl StoreToInstances {
    pub fn infer_schema(&self, input: &ArraySchema) -> ArraySchema {
        input.clone()
    }

    pub fn execute<A>(&self, input: A) -> A {
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residency::ResidencySet;
    use crate::schema::ArrayShape;
    use crate::transient::MemArray;
    use crate::types::InstanceId;
    use crate::types::QueryId;

    #[test]
    fn test_identity() {
        let residency = ResidencySet::new([InstanceId(1), InstanceId(2)]).unwrap();
        let schema = ArraySchema::draft("public", "a", ArrayShape::new().dimension("i", 0, None, 100), residency);
        let op = StoreToInstances;

        assert_eq!(op.infer_schema(&schema), schema);

        let array = MemArray::new(schema.clone(), QueryId::new());
        let out = op.execute(array);
        assert_eq!(out.schema(), &schema);
    }
}
