//! Method metadata as seen by the compiler bridge.
//!
//! The runtime owns the real method and module representations; this module
//! only carries what the bridge needs: the flags that decide whether a method
//! is a bootstrap candidate and the identity of its owning module.

use std::fmt;
use std::sync::Arc;

/// Identity of a runtime module. Two ids are equal iff they name the same module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a method is an ordinary method or one of the initializers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MethodKind {
    #[default]
    Regular,
    /// Instance constructor.
    ObjectInitializer,
    /// Static class initializer.
    ClassInitializer,
}

/// A method known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub holder: String,
    pub name: String,
    pub module: ModuleId,
    pub kind: MethodKind,
    pub is_native: bool,
    pub is_static: bool,
}

/// Shared handle to a method; compile tasks hold one of these.
pub type MethodRef = Arc<Method>;

impl Method {
    /// A regular, non-native instance method.
    pub fn new(holder: impl Into<String>, name: impl Into<String>, module: ModuleId) -> Self {
        Self {
            holder: holder.into(),
            name: name.into(),
            module,
            kind: MethodKind::Regular,
            is_native: false,
            is_static: false,
        }
    }

    pub fn with_kind(mut self, kind: MethodKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn is_initializer(&self) -> bool {
        !matches!(self.kind, MethodKind::Regular)
    }

    /// Module that owns the method's holder class.
    pub fn holder_module(&self) -> &ModuleId {
        &self.module
    }

    /// Methods the bootstrap seeds into the compile queue: compiled code can
    /// only be produced for non-native instance methods that are not initializers.
    pub fn is_bootstrap_candidate(&self) -> bool {
        !self.is_native && !self.is_static && !self.is_initializer()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.holder, self.name)
    }
}

/// Access to the methods of the runtime's root class.
pub trait MethodRegistry: Send + Sync {
    fn root_class_methods(&self) -> Vec<MethodRef>;
}

/// A fixed list of root class methods.
#[derive(Debug, Clone, Default)]
pub struct StaticMethodRegistry {
    methods: Vec<MethodRef>,
}

impl StaticMethodRegistry {
    pub fn new(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().map(Arc::new).collect(),
        }
    }
}

impl MethodRegistry for StaticMethodRegistry {
    fn root_class_methods(&self) -> Vec<MethodRef> {
        self.methods.clone()
    }
}
