//! Component type registration and metadata.
//!
//! Every component type used in a [`World`](crate::world::World) must be
//! registered in its [`ComponentRegistry`]. Registration produces a
//! [`ComponentTypeId`] that keys archetype columns and query matching, and
//! stores the per-type operations (column factory, JSON deserializer,
//! insertion rules) the type-erased storage needs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::column::{BoxedComponent, Column, ComponentColumn};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Bound shared by every type that can be stored as a component.
///
/// Implemented automatically for all `Clone + Send + Sync + Serialize +
/// DeserializeOwned` types.
pub trait Component: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Component for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Position of this type in registration order.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique ID assigned at registration time.
    pub id: ComponentTypeId,
    /// Human-readable name (supplied by the caller).
    pub name: String,
    /// `std::any::type_name::<T>()`
    pub type_name: &'static str,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
}

// ---------------------------------------------------------------------------
// ComponentRules
// ---------------------------------------------------------------------------

type ErasedValidator = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), String> + Send + Sync>;

/// Insertion rules attached to a component type at registration.
///
/// Rules are checked whenever a value of `T` enters an entity (spawn bundle,
/// add component, deferred command), before any storage is touched. The
/// `requires` list is also checked when a co-component is removed.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct Transform { x: f32 }
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct Sprite { scale: f32 }
///
/// let mut world = World::new();
/// world.register_component::<Transform>("transform").unwrap();
/// world
///     .register_component_with::<Sprite>(
///         "sprite",
///         ComponentRules::new()
///             .requires::<Transform>()
///             .validate_with(|s: &Sprite| {
///                 if s.scale > 0.0 { Ok(()) } else { Err("scale must be positive".into()) }
///             }),
///     )
///     .unwrap();
///
/// let e = world.spawn();
/// assert!(world.add_component(e, Sprite { scale: 1.0 }).is_err());
/// ```
pub struct ComponentRules<T> {
    requires: Vec<(TypeId, &'static str)>,
    validator: Option<Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>>,
}

impl<T: Component> ComponentRules<T> {
    /// Rules with no requirements; equivalent to a plain registration.
    pub fn new() -> Self {
        Self {
            requires: Vec::new(),
            validator: None,
        }
    }

    /// Require `D` to be present on the entity whenever `T` is. Checked when
    /// `T` is added and when `D` is removed.
    pub fn requires<D: Component>(mut self) -> Self {
        self.requires
            .push((TypeId::of::<D>(), std::any::type_name::<D>()));
        self
    }

    /// Reject values for which `validator` returns an error message.
    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    fn erase(self) -> ErasedRules {
        let validator = self.validator.map(|f| -> ErasedValidator {
            Box::new(move |value: &(dyn Any + Send + Sync)| match value.downcast_ref::<T>() {
                Some(v) => f(v),
                None => Err(format!(
                    "value is not a {}",
                    std::any::type_name::<T>()
                )),
            })
        });
        ErasedRules {
            requires: self.requires,
            validator,
        }
    }
}

impl<T: Component> Default for ComponentRules<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ErasedRules {
    requires: Vec<(TypeId, &'static str)>,
    validator: Option<ErasedValidator>,
}

// ---------------------------------------------------------------------------
// ComponentVtable
// ---------------------------------------------------------------------------

/// Per-type operations captured at registration so storage can stay
/// type-erased.
struct ComponentVtable {
    new_column: fn() -> Box<dyn ComponentColumn>,
    deserialize: fn(&serde_json::Value) -> Result<BoxedComponent, String>,
    rules: Option<ErasedRules>,
}

fn new_column<T: Component>() -> Box<dyn ComponentColumn> {
    Box::new(Column::<T>::new())
}

fn deserialize_value<T: Component>(value: &serde_json::Value) -> Result<BoxedComponent, String> {
    <T as serde::Deserialize>::deserialize(value)
        .map(|v| Box::new(v) as BoxedComponent)
        .map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentTypeId`]s and their metadata.
///
/// A type can only be registered once; subsequent registrations of the same
/// Rust `TypeId` return the existing [`ComponentTypeId`]. There is no
/// removal.
pub struct ComponentRegistry {
    /// TypeId -> ComponentTypeId for dedup.
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Name -> ComponentTypeId for lookup by string name (snapshots).
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    infos: Vec<ComponentInfo>,
    /// Indexed by ComponentTypeId.0.
    vtables: Vec<ComponentVtable>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            infos: Vec::new(),
            vtables: Vec::new(),
        }
    }

    /// Register a component type under the given `name`.
    ///
    /// If the type has already been registered, the existing
    /// [`ComponentTypeId`] is returned and `name` is ignored. A `name` already
    /// bound to another type is rejected.
    pub fn register<T: Component>(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.register_inner::<T>(name, None)
    }

    /// Register a component type together with its insertion rules.
    ///
    /// Re-registering an existing type replaces its rules.
    pub fn register_with<T: Component>(
        &mut self,
        name: &str,
        rules: ComponentRules<T>,
    ) -> Result<ComponentTypeId, EcsError> {
        self.register_inner::<T>(name, Some(rules.erase()))
    }

    fn register_inner<T: Component>(
        &mut self,
        name: &str,
        rules: Option<ErasedRules>,
    ) -> Result<ComponentTypeId, EcsError> {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            if rules.is_some() {
                self.vtables[existing.index()].rules = rules;
            }
            return Ok(existing);
        }
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateComponentName {
                name: name.to_owned(),
            });
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: rust_type_id,
        });
        self.vtables.push(ComponentVtable {
            new_column: new_column::<T>,
            deserialize: deserialize_value::<T>,
            rules,
        });
        self.by_type.insert(rust_type_id, id);
        self.by_name.insert(name.to_owned(), id);
        tracing::debug!(component = name, id = id.0, "registered component type");
        Ok(id)
    }

    /// Look up a component type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Like [`lookup`](Self::lookup), but reports an unregistered type as an
    /// error carrying the Rust type name.
    pub fn id_of<T: 'static>(&self) -> Result<ComponentTypeId, EcsError> {
        self.lookup::<T>().ok_or_else(|| EcsError::UnregisteredType {
            name: std::any::type_name::<T>().to_owned(),
        })
    }

    /// Resolve a raw `TypeId`; `type_name` is only used for the error.
    pub(crate) fn id_of_type_id(
        &self,
        type_id: TypeId,
        type_name: &str,
    ) -> Result<ComponentTypeId, EcsError> {
        self.by_type
            .get(&type_id)
            .copied()
            .ok_or_else(|| EcsError::UnregisteredType {
                name: type_name.to_owned(),
            })
    }

    /// Look up a component type by its registered string name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Get the [`ComponentInfo`] for a registered component type ID.
    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Registered name of `id`, or `"<unknown>"` for foreign ids.
    pub fn name_of(&self, id: ComponentTypeId) -> &str {
        self.infos
            .get(id.index())
            .map(|info| info.name.as_str())
            .unwrap_or("<unknown>")
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Returns the names of all registered component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Whether `id` has insertion rules attached.
    pub fn has_rules(&self, id: ComponentTypeId) -> bool {
        self.vtables
            .get(id.index())
            .is_some_and(|vt| vt.rules.is_some())
    }

    // -- type-erased operations ----------------------------------------------

    pub(crate) fn new_column(&self, id: ComponentTypeId) -> Option<Box<dyn ComponentColumn>> {
        self.vtables.get(id.index()).map(|vt| (vt.new_column)())
    }

    pub(crate) fn deserialize(
        &self,
        id: ComponentTypeId,
        value: &serde_json::Value,
    ) -> Result<BoxedComponent, EcsError> {
        let vt = self
            .vtables
            .get(id.index())
            .ok_or_else(|| EcsError::UnregisteredType {
                name: format!("{id:?}"),
            })?;
        (vt.deserialize)(value).map_err(|details| EcsError::Snapshot {
            details: format!("failed to deserialize '{}': {}", self.name_of(id), details),
        })
    }

    /// Check that `value` is a value of the type registered as `id`.
    pub(crate) fn check_value_type(
        &self,
        id: ComponentTypeId,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), EcsError> {
        let value: &dyn Any = value;
        match self.infos.get(id.index()) {
            Some(info) if info.type_id == value.type_id() => Ok(()),
            _ => Err(EcsError::UnregisteredType {
                name: format!("{id:?}"),
            }),
        }
    }

    /// Run the insertion rules of `id` for `value`, given the full signature
    /// the entity will have afterwards.
    pub(crate) fn validate_insert(
        &self,
        id: ComponentTypeId,
        value: &(dyn Any + Send + Sync),
        signature_after: &[ComponentTypeId],
    ) -> Result<(), EcsError> {
        self.check_requirements(id, signature_after)?;
        let Some(validator) = self.rules_of(id).and_then(|r| r.validator.as_ref()) else {
            return Ok(());
        };
        validator(value).map_err(|reason| EcsError::DependencyValidation {
            component: self.name_of(id).to_owned(),
            reason,
        })
    }

    /// Check that every co-component `id` requires is in `signature`.
    ///
    /// A requirement on a type that was never registered can never be met
    /// and is reported the same way as an absent one.
    pub(crate) fn check_requirements(
        &self,
        id: ComponentTypeId,
        signature: &[ComponentTypeId],
    ) -> Result<(), EcsError> {
        let Some(rules) = self.rules_of(id) else {
            return Ok(());
        };
        for &(dep_type, dep_type_name) in &rules.requires {
            let reason = match self.by_type.get(&dep_type) {
                Some(dep) if signature.binary_search(dep).is_ok() => continue,
                Some(&dep) => format!("requires component '{}'", self.name_of(dep)),
                None => format!("requires unregistered component '{dep_type_name}'"),
            };
            return Err(EcsError::DependencyValidation {
                component: self.name_of(id).to_owned(),
                reason,
            });
        }
        Ok(())
    }

    fn rules_of(&self, id: ComponentTypeId) -> Option<&ErasedRules> {
        self.vtables.get(id.index()).and_then(|vt| vt.rules.as_ref())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("infos", &self.infos)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
