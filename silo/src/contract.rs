// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Service contracts and their descriptors.
//!
//! A contract is an async trait annotated with `#[service_contract]`. The
//! macro generates a marker type implementing [ServiceContract], which knows
//! how to build the interface's [ServiceDescriptor] (its id, name and method
//! table) and how to wrap a [ReferenceTarget] into a typed reference.
//! Descriptors are built lazily on first use and cached per contract type for
//! the life of the process.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::concurrency::Duration;
use crate::errors::ContractErr;
use crate::method_id;
use crate::reference::ReferenceTarget;
use crate::InvokeRequest;

/// How a method is invoked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Fire and forget, no response is produced
    pub one_way: bool,
    /// Overrides the silo's request timeout
    pub timeout: Option<Duration>,
}

/// The declaration of one contract method, fed to [ServiceDescriptorBuilder]
#[derive(Debug, Clone)]
pub struct MethodSpec {
    name: String,
    generic_args: Vec<String>,
    param_types: Vec<String>,
    returns_unit: bool,
    options: InvokeOptions,
}

impl MethodSpec {
    /// Start describing the method `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_args: Vec::new(),
            param_types: Vec::new(),
            returns_unit: false,
            options: InvokeOptions::default(),
        }
    }

    /// Parameter type names in declared order
    pub fn params(mut self, types: &[&str]) -> Self {
        self.param_types
            .extend(types.iter().map(|t| method_id::normalize_type_name(t)));
        self
    }

    /// Generic argument names in declared order
    pub fn generics(mut self, names: &[&str]) -> Self {
        self.generic_args
            .extend(names.iter().map(|t| method_id::normalize_type_name(t)));
        self
    }

    /// Whether the success type is `()`
    pub fn returns_unit(mut self, returns_unit: bool) -> Self {
        self.returns_unit = returns_unit;
        self
    }

    /// Mark the method fire-and-forget
    pub fn one_way(mut self) -> Self {
        self.options.one_way = true;
        self
    }

    /// Override the request timeout for this method
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

/// A resolved contract method
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    id: u32,
    name: String,
    signature: String,
    arity: usize,
    returns_unit: bool,
    options: InvokeOptions,
}

impl MethodDescriptor {
    /// The method id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The bare method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical signature the id was computed from
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Number of declared parameters
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Whether the success type is `()`
    pub fn returns_unit(&self) -> bool {
        self.returns_unit
    }

    /// Invocation options
    pub fn options(&self) -> &InvokeOptions {
        &self.options
    }

    /// Build the request for a call of this method
    pub fn request(&self, interface_id: u32, arguments: Vec<Vec<u8>>) -> InvokeRequest {
        InvokeRequest::new(interface_id, self.id, arguments).with_timeout(self.options.timeout)
    }
}

/// The method table of one service interface
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    interface_id: u32,
    name: String,
    methods: Vec<MethodDescriptor>,
    index: HashMap<u32, usize>,
}

impl ServiceDescriptor {
    /// Start building the descriptor of the interface `name`
    pub fn builder(name: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// The interface id
    pub fn interface_id(&self) -> u32 {
        self.interface_id
    }

    /// The interface's qualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All methods, in declared order
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// The method at a declared position
    pub fn method_at(&self, index: usize) -> Option<&MethodDescriptor> {
        self.methods.get(index)
    }

    /// The declared position of a method id
    pub fn method_index(&self, method_id: u32) -> Option<usize> {
        self.index.get(&method_id).copied()
    }

    /// Look up a method by id
    pub fn method(&self, method_id: u32) -> Option<&MethodDescriptor> {
        self.method_index(method_id)
            .and_then(|index| self.methods.get(index))
    }

    /// Best-effort human name of a method id, for diagnostics
    pub fn describe_method(&self, method_id: u32) -> String {
        match self.method(method_id) {
            Some(method) => format!("{}::{}", self.name, method.name),
            None => format!("{}::#{method_id:08x}", self.name),
        }
    }
}

/// Accumulates [MethodSpec]s and validates them into a [ServiceDescriptor]
#[derive(Debug)]
pub struct ServiceDescriptorBuilder {
    name: String,
    methods: Vec<MethodSpec>,
}

impl ServiceDescriptorBuilder {
    /// Add a method
    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    /// Compute ids and validate the table
    pub fn build(self) -> Result<ServiceDescriptor, ContractErr> {
        if self.name.is_empty() {
            return Err(ContractErr::EmptyInterfaceName);
        }
        let mut methods = Vec::with_capacity(self.methods.len());
        let mut index = HashMap::with_capacity(self.methods.len());
        for spec in self.methods {
            if spec.options.one_way && !spec.returns_unit {
                return Err(ContractErr::OneWayMustReturnUnit {
                    interface: self.name,
                    method: spec.name,
                });
            }
            let signature =
                method_id::canonical_signature(&spec.name, &spec.generic_args, &spec.param_types);
            let id = method_id::hash_fold(&signature);
            if let Some(&existing) = index.get(&id) {
                let other: &MethodDescriptor = &methods[existing];
                return Err(ContractErr::DuplicateMethodId {
                    signatures: (other.signature.clone(), signature),
                    interface: self.name,
                    id,
                });
            }
            index.insert(id, methods.len());
            methods.push(MethodDescriptor {
                id,
                name: spec.name,
                signature,
                arity: spec.param_types.len(),
                returns_unit: spec.returns_unit,
                options: spec.options,
            });
        }
        Ok(ServiceDescriptor {
            interface_id: method_id::interface_id(&self.name),
            name: self.name,
            methods,
            index,
        })
    }
}

/// A service interface known to the runtime. Implemented by the marker type
/// `#[service_contract]` generates for each annotated trait.
pub trait ServiceContract: Send + Sync + 'static {
    /// The typed reference (proxy) implementing the interface
    type Reference: Clone + Send + Sync + 'static;

    /// Fully qualified interface name
    fn interface_name() -> String;

    /// Build (and validate) the descriptor. Prefer [ServiceContract::descriptor],
    /// which caches the result.
    fn build_descriptor() -> Result<ServiceDescriptor, ContractErr>;

    /// Wrap a routing target into a typed reference
    fn reference(target: Arc<dyn ReferenceTarget>) -> Self::Reference;

    /// The cached descriptor of this contract
    fn descriptor() -> Result<Arc<ServiceDescriptor>, ContractErr>
    where
        Self: Sized,
    {
        descriptor_of::<Self>()
    }
}

static DESCRIPTORS: Lazy<DashMap<TypeId, Arc<ServiceDescriptor>>> = Lazy::new(DashMap::new);

/// Fetch the cached descriptor of a contract, building it on first use
pub fn descriptor_of<C: ServiceContract>() -> Result<Arc<ServiceDescriptor>, ContractErr> {
    let key = TypeId::of::<C>();
    if let Some(found) = DESCRIPTORS.get(&key) {
        return Ok(found.value().clone());
    }
    let built = Arc::new(C::build_descriptor()?);
    Ok(DESCRIPTORS.entry(key).or_insert(built).value().clone())
}
