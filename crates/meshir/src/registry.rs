use std::sync::{Arc, OnceLock};

use crate::adapter::{KernelSupport, KernelSupportTable, OpAdaptationRegistry};
use crate::infer::InferRegistry;

/// Read-only tables consulted during a compile.
#[derive(Clone)]
pub struct Registries {
    pub ops: InferRegistry,
    pub adaptations: Arc<OpAdaptationRegistry>,
    pub support: Arc<dyn KernelSupport>,
}

static GLOBAL: OnceLock<Registries> = OnceLock::new();

impl Registries {
    pub fn builtin() -> Self {
        Self {
            ops: InferRegistry::builtin(),
            adaptations: Arc::new(OpAdaptationRegistry::builtin()),
            support: Arc::new(KernelSupportTable::builtin()),
        }
    }

    /// Builtin tables, built on first use.
    pub fn global() -> &'static Registries {
        GLOBAL.get_or_init(Registries::builtin)
    }

    pub fn with_support(mut self, support: Arc<dyn KernelSupport>) -> Self {
        self.support = support;
        self
    }

    pub fn with_adaptations(mut self, adaptations: OpAdaptationRegistry) -> Self {
        self.adaptations = Arc::new(adaptations);
        self
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("adaptations", &self.adaptations.len())
            .finish_non_exhaustive()
    }
}
