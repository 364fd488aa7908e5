//! Shared test fixture: a miniature runtime world with a declarative
//! class-shape loader.
//!
//! Tests describe classes as [`ShapeSpec`]s; the [`TestLoader`] lays out
//! fields (inherited instance fields first, then declared order, aligned to
//! field width), sorts methods by name and signature, and rebuilds shapes
//! against whatever hierarchy the registry currently holds. Replacement
//! bytes just carry the class name; the pending-shape table decides what
//! the "new bytes" mean.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use hotswap::prelude::*;

/// Declarative description of one class shape.
#[derive(Debug, Clone)]
pub struct ShapeSpec {
    pub name: String,
    pub kind: ClassKind,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<(String, FieldType, bool)>,
    pub methods: Vec<(String, String, Visibility, u64)>,
}

impl ShapeSpec {
    pub fn class(name: &str) -> Self {
        ShapeSpec {
            name: name.into(),
            kind: ClassKind::Instance,
            super_name: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> Self {
        ShapeSpec {
            kind: ClassKind::Interface,
            ..ShapeSpec::class(name)
        }
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty, false));
        self
    }

    pub fn static_field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty, true));
        self
    }

    pub fn method(mut self, name: &str, body_token: u64) -> Self {
        self.methods
            .push((name.into(), "()V".into(), Visibility::Visible, body_token));
        self
    }

    pub fn private_method(mut self, name: &str, body_token: u64) -> Self {
        self.methods
            .push((name.into(), "()V".into(), Visibility::Private, body_token));
        self
    }
}

/// Loader that builds [`ClassVersion`]s from shape specs.
///
/// `pending` holds replacement shapes for the next transaction; `current`
/// holds the shape every loaded class was last built from, which doubles as
/// the reconstitution source for indirectly affected classes.
#[derive(Default)]
pub struct TestLoader {
    pending: RwLock<HashMap<String, ShapeSpec>>,
    current: RwLock<HashMap<String, ShapeSpec>>,
}

impl TestLoader {
    fn shape_for(&self, name: &str) -> Option<ShapeSpec> {
        let pending = self.pending.read().unwrap();
        if let Some(shape) = pending.get(name) {
            return Some(shape.clone());
        }
        drop(pending);
        self.current.read().unwrap().get(name).cloned()
    }

    /// Lays out a version from a shape against the registry's current
    /// newest versions (candidates included once attached).
    fn build(
        &self,
        shape: &ShapeSpec,
        id: ClassId,
        generation: Generation,
        registry: &ClassRegistry,
        names: &HashMap<String, ClassId>,
    ) -> ClassVersion {
        let super_id = shape.super_name.as_ref().map(|n| names[n]);
        let mut interfaces: Vec<ClassId> = Vec::new();
        let mut add_iface = |iid: ClassId, interfaces: &mut Vec<ClassId>| {
            if !interfaces.contains(&iid) {
                interfaces.push(iid);
            }
        };
        for name in &shape.interfaces {
            let iid = names[name];
            add_iface(iid, &mut interfaces);
            if let Some(v) = registry.newest(iid) {
                for &t in &v.interfaces {
                    add_iface(t, &mut interfaces);
                }
            }
        }
        if let Some(sid) = super_id {
            if let Some(v) = registry.newest(sid) {
                for &t in &v.interfaces {
                    add_iface(t, &mut interfaces);
                }
            }
        }

        // Inherited instance fields keep the super's layout verbatim.
        let mut fields: Vec<FieldDef> = Vec::new();
        let mut cursor = 0u32;
        if let Some(sid) = super_id {
            if let Some(v) = registry.newest(sid) {
                for f in v.fields.iter().filter(|f| !f.is_static) {
                    cursor = cursor.max(f.offset + f.ty.width());
                    fields.push(f.clone());
                }
            }
        }
        for (name, ty, _) in shape.fields.iter().filter(|(_, _, s)| !s) {
            let offset = align(cursor, ty.width());
            fields.push(FieldDef {
                name: name.clone(),
                ty: *ty,
                offset,
                is_static: false,
            });
            cursor = offset + ty.width();
        }
        let instance_size = cursor;

        let mut static_cursor = 0u32;
        for (name, ty, _) in shape.fields.iter().filter(|(_, _, s)| *s) {
            let offset = align(static_cursor, ty.width());
            fields.push(FieldDef {
                name: name.clone(),
                ty: *ty,
                offset,
                is_static: true,
            });
            static_cursor = offset + ty.width();
        }

        let mut method_specs = shape.methods.clone();
        method_specs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        let methods: Vec<MethodDef> = method_specs
            .into_iter()
            .enumerate()
            .map(|(slot, (name, signature, visibility, token))| {
                MethodDef::new(
                    name,
                    signature,
                    visibility,
                    token,
                    MethodSlot(slot as u32),
                )
            })
            .collect();

        ClassVersion::new(
            id,
            generation,
            shape.kind,
            shape.name.clone(),
            fields,
            methods,
            super_id,
            interfaces,
            instance_size,
            static_cursor,
        )
    }
}

fn align(offset: u32, width: u32) -> u32 {
    offset.div_ceil(width) * width
}

/// Stack scanner whose pinned set tests can script.
#[derive(Default)]
pub struct ScriptedStacks {
    pinned: RwLock<std::collections::HashSet<(ClassId, MethodSlot)>>,
}

impl ScriptedStacks {
    pub fn pin(&self, class: ClassId, slot: MethodSlot) {
        self.pinned.write().unwrap().insert((class, slot));
    }
}

impl StackScanner for ScriptedStacks {
    fn pin_reachable_methods(&self) -> std::collections::HashSet<(ClassId, MethodSlot)> {
        self.pinned.read().unwrap().clone()
    }
}

/// Sink that records every commit notification.
#[derive(Default)]
pub struct RecordingSink {
    pub notified: Mutex<Vec<Vec<ClassId>>>,
}

impl RedefinitionSink for RecordingSink {
    fn classes_redefined(&self, classes: &[ClassId]) {
        self.notified.lock().unwrap().push(classes.to_vec());
    }
}

/// The world tests operate on: registry, heap, loader and scripted
/// collaborators.
pub struct TestWorld {
    pub registry: ClassRegistry,
    pub heap: Heap,
    pub loader: TestLoader,
    pub stacks: ScriptedStacks,
    pub sink: RecordingSink,
    names: RwLock<HashMap<String, ClassId>>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    pub fn new() -> Self {
        TestWorld {
            registry: ClassRegistry::new(),
            heap: Heap::new(),
            loader: TestLoader::default(),
            stacks: ScriptedStacks::default(),
            sink: RecordingSink::default(),
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a class into the registry from its shape, with a mirror.
    pub fn define(&self, shape: ShapeSpec) -> ClassId {
        let id = self.registry.allocate_id();
        self.names
            .write()
            .unwrap()
            .insert(shape.name.clone(), id);
        let names = self.names.read().unwrap().clone();
        let version = Arc::new(self.loader.build(
            &shape,
            id,
            Generation::INITIAL,
            &self.registry,
            &names,
        ));
        version.set_mirror(self.heap.alloc_mirror(id, Generation::INITIAL));
        version.set_initialized(true);
        self.registry.register(version).unwrap();
        self.loader
            .current
            .write()
            .unwrap()
            .insert(shape.name.clone(), shape);
        id
    }

    pub fn id(&self, name: &str) -> ClassId {
        self.names.read().unwrap()[name]
    }

    pub fn newest(&self, name: &str) -> Arc<ClassVersion> {
        self.registry.newest(self.id(name)).unwrap()
    }

    /// Queues a replacement shape and returns the request for it.
    pub fn request(&self, shape: ShapeSpec) -> RedefinitionRequest {
        let target = self.id(&shape.name);
        let bytes = ReplacementBytes::new(shape.name.clone().into_bytes());
        self.loader
            .pending
            .write()
            .unwrap()
            .insert(shape.name.clone(), shape);
        RedefinitionRequest { target, bytes }
    }

    /// Runs one transaction through a fresh coordinator.
    pub fn submit(
        &self,
        requests: &[RedefinitionRequest],
    ) -> hotswap::Result<RedefinitionOutcome> {
        let gc = HeapGc;
        let comparator = TokenComparator;
        let coordinator = RedefineCoordinator::new(
            &self.registry,
            &self.heap,
            self,
            &gc,
            &self.stacks,
            &comparator,
            &self.sink,
        );
        let outcome = coordinator.submit(requests);
        // Committed shapes become the reconstitution source for the next
        // transaction; failed ones are forgotten.
        let pending: Vec<ShapeSpec> = self
            .loader
            .pending
            .write()
            .unwrap()
            .drain()
            .map(|(_, s)| s)
            .collect();
        if outcome.is_ok() {
            let mut current = self.loader.current.write().unwrap();
            for shape in pending {
                current.insert(shape.name.clone(), shape);
            }
        }
        outcome
    }

    pub fn alloc(&self, name: &str) -> ObjRef {
        self.heap.alloc_instance(&self.newest(name))
    }

    pub fn offset_of(&self, class: &str, field: &str) -> u32 {
        self.newest(class)
            .fields
            .iter()
            .find(|f| f.name == field && !f.is_static)
            .unwrap_or_else(|| panic!("no field {field} on {class}"))
            .offset
    }
}

impl ClassLoader for TestWorld {
    fn parse(
        &self,
        old: &ClassVersion,
        bytes: &ReplacementBytes,
        registry: &ClassRegistry,
    ) -> hotswap::Result<ClassVersion> {
        let name = String::from_utf8(bytes.as_slice().to_vec())
            .map_err(|_| ParseFailure::MalformedClass("not utf-8".into()))?;
        let shape = self
            .loader
            .shape_for(&name)
            .ok_or_else(|| ParseFailure::MalformedClass(format!("unknown shape {name}")))?;
        let names = self.names.read().unwrap().clone();
        Ok(self
            .loader
            .build(&shape, old.id, old.generation, registry, &names))
    }

    fn reconstitute(&self, current: &ClassVersion) -> hotswap::Result<ReplacementBytes> {
        Ok(ReplacementBytes::new(current.name.clone().into_bytes()))
    }

    fn verify(&self, _candidate: &ClassVersion) -> hotswap::Result<()> {
        Ok(())
    }
}
