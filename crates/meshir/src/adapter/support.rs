use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::ir::{prim, AbstractValue, DType, Primitive};

/// What a kernel table is asked about one candidate call.
#[derive(Debug, Clone, Copy)]
pub struct KernelQuery<'a> {
    pub prim: &'a Primitive,
    pub output: Option<&'a AbstractValue>,
    pub dynamic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("no kernel registered for {op}")]
    NotRegistered { op: String },
    #[error("{op} has no dynamic-shape kernel")]
    DynamicShape { op: String },
    #[error("{op} has no kernel for element type {dtype}")]
    DType { op: String, dtype: DType },
    #[error("{op} kernel requires attribute '{attr}'")]
    MissingAttr { op: String, attr: String },
}

/// Backend capability oracle consulted before committing an adaptation.
pub trait KernelSupport: Send + Sync {
    fn check(&self, query: &KernelQuery) -> Result<(), Unsupported>;

    fn supports(&self, query: &KernelQuery) -> bool {
        self.check(query).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub dtypes: Option<BTreeSet<DType>>,
    pub allow_dynamic: bool,
    pub required_attrs: Vec<String>,
}

impl Default for KernelSpec {
    fn default() -> Self {
        Self {
            dtypes: None,
            allow_dynamic: true,
            required_attrs: Vec::new(),
        }
    }
}

impl KernelSpec {
    pub fn allow_dtypes(mut self, dtypes: impl IntoIterator<Item = DType>) -> Self {
        self.dtypes = Some(dtypes.into_iter().collect());
        self
    }

    pub fn with_dynamic_shape(mut self, allowed: bool) -> Self {
        self.allow_dynamic = allowed;
        self
    }

    pub fn require_attr(mut self, attr: &str) -> Self {
        self.required_attrs.push(attr.to_string());
        self
    }
}

/// Table-driven [`KernelSupport`] keyed by primitive name.
#[derive(Debug, Clone, Default)]
pub struct KernelSupportTable {
    kernels: HashMap<String, KernelSpec>,
    allow_unlisted: bool,
}

const FLOATS: [DType; 3] = [DType::F16, DType::BF16, DType::F32];
const NUMERIC: [DType; 6] = [
    DType::F16,
    DType::BF16,
    DType::F32,
    DType::I8,
    DType::I32,
    DType::I64,
];

impl KernelSupportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts every op without an entry; entries still restrict their op.
    pub fn permissive() -> Self {
        Self {
            kernels: HashMap::new(),
            allow_unlisted: true,
        }
    }

    pub fn with_unlisted(mut self, allowed: bool) -> Self {
        self.allow_unlisted = allowed;
        self
    }

    pub fn register(&mut self, op: &str, spec: KernelSpec) -> &mut Self {
        self.kernels.insert(op.to_string(), spec);
        self
    }

    pub fn get(&self, op: &str) -> Option<&KernelSpec> {
        self.kernels.get(op)
    }

    /// Kernels of the reference backend: the input-driven forms run on dynamic
    /// shapes, the attribute-driven `*D` forms only on static ones.
    pub fn builtin() -> Self {
        let mut table = Self::permissive();
        for op in [
            prim::REDUCE_SUM,
            prim::REDUCE_MEAN,
            prim::REDUCE_MAX,
            prim::REDUCE_MIN,
        ] {
            table.register(op, KernelSpec::default().allow_dtypes(NUMERIC));
            table.register(
                &format!("{op}D"),
                KernelSpec::default()
                    .allow_dtypes(FLOATS)
                    .with_dynamic_shape(false)
                    .require_attr(prim::ATTR_AXIS),
            );
        }
        table
            .register(prim::TRANSPOSE, KernelSpec::default())
            .register(
                "TransposeD",
                KernelSpec::default()
                    .with_dynamic_shape(false)
                    .require_attr(prim::ATTR_PERM),
            )
            .register(prim::TILE, KernelSpec::default())
            .register(
                "TileD",
                KernelSpec::default()
                    .with_dynamic_shape(false)
                    .require_attr(prim::ATTR_MULTIPLES),
            )
            .register(prim::GATHER, KernelSpec::default())
            .register(
                "GatherD",
                KernelSpec::default()
                    .with_dynamic_shape(false)
                    .require_attr(prim::ATTR_AXIS),
            );
        table
    }
}

impl KernelSupport for KernelSupportTable {
    fn check(&self, query: &KernelQuery) -> Result<(), Unsupported> {
        let op = &query.prim.name;
        let Some(spec) = self.kernels.get(op) else {
            if self.allow_unlisted {
                return Ok(());
            }
            return Err(Unsupported::NotRegistered { op: op.clone() });
        };
        if query.dynamic && !spec.allow_dynamic {
            return Err(Unsupported::DynamicShape { op: op.clone() });
        }
        if let (Some(allowed), Some(dtype)) = (&spec.dtypes, query.output.and_then(|v| v.dtype())) {
            if !allowed.contains(&dtype) {
                return Err(Unsupported::DType {
                    op: op.clone(),
                    dtype,
                });
            }
        }
        if let Some(attr) = spec
            .required_attrs
            .iter()
            .find(|attr| !query.prim.has_attr(attr))
        {
            return Err(Unsupported::MissingAttr {
                op: op.clone(),
                attr: attr.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_only_kernels_reject_dynamic_queries() {
        let table = KernelSupportTable::builtin();
        let prim = Primitive::new("ReduceSumD").with_attr(prim::ATTR_AXIS, crate::ir::Value::IntList(vec![0]));
        let output = AbstractValue::tensor(DType::F32, &[4]);
        let query = KernelQuery {
            prim: &prim,
            output: Some(&output),
            dynamic: true,
        };
        assert_eq!(
            table.check(&query),
            Err(Unsupported::DynamicShape {
                op: "ReduceSumD".into()
            })
        );
        assert!(table.supports(&KernelQuery {
            dynamic: false,
            ..query
        }));
    }

    #[test]
    fn strict_table_rejects_unlisted_ops() {
        let table = KernelSupportTable::new();
        let prim = Primitive::new("Frobnicate");
        let query = KernelQuery {
            prim: &prim,
            output: None,
            dynamic: false,
        };
        assert!(matches!(
            table.check(&query),
            Err(Unsupported::NotRegistered { .. })
        ));
    }
}
