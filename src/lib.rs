// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # hotswap
//!
//! A live class redefinition engine for managed runtimes: atomic,
//! dependency-ordered replacement of loaded class definitions while
//! instances of those classes are live on the heap.
//!
//! `hotswap` implements the machinery between a debugger's "redefine
//! classes" request and a heap whose objects keep working afterwards:
//! change classification, transactional multi-class batches, field-layout
//! migration of live instances, and repair of every resolved link that
//! named the old definitions. Class-file parsing, bytecode verification and
//! garbage collection stay outside the crate behind collaborator traits.
//!
//! ## Features
//!
//! - **Atomic batches** - A batch of class redefinitions commits entirely or
//!   not at all; any pre-safepoint failure rolls back with no trace
//! - **Dependency ordering** - Affected classes (descendants, implementors)
//!   are discovered transitively and processed ancestors-first
//! - **Live instance migration** - Compact copy/fill programs move existing
//!   field values into the new layout; added fields read as default values
//! - **Identity stability** - Class identities, method slot ids and the
//!   identity/hash tokens of redefined classes survive the transition
//! - **Link repair** - Resolved-constant caches, quickened call sites,
//!   mirrors and member handles are fixed up in the same safepoint
//!
//! ## Quick Start
//!
//! The embedder supplies a [`runtime::collaborators::ClassLoader`] and a
//! [`runtime::collaborators::StackScanner`]; the in-crate defaults cover
//! the collector, body comparator and notification sink.
//!
//! ```rust
//! use hotswap::prelude::*;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! // A loader that re-parses a class into an identical shape.
//! struct EchoLoader;
//!
//! impl ClassLoader for EchoLoader {
//!     fn parse(
//!         &self,
//!         old: &ClassVersion,
//!         _bytes: &ReplacementBytes,
//!         _registry: &ClassRegistry,
//!     ) -> hotswap::Result<ClassVersion> {
//!         Ok(ClassVersion::new(
//!             old.id,
//!             old.generation,
//!             old.kind,
//!             old.name.clone(),
//!             vec![],
//!             vec![],
//!             old.super_id,
//!             old.interfaces.clone(),
//!             old.instance_size,
//!             old.static_size,
//!         ))
//!     }
//!
//!     fn reconstitute(&self, _current: &ClassVersion) -> hotswap::Result<ReplacementBytes> {
//!         Ok(ReplacementBytes::new(vec![0]))
//!     }
//!
//!     fn verify(&self, _candidate: &ClassVersion) -> hotswap::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! struct IdleStacks;
//!
//! impl StackScanner for IdleStacks {
//!     fn pin_reachable_methods(&self) -> HashSet<(ClassId, MethodSlot)> {
//!         HashSet::new()
//!     }
//! }
//!
//! let registry = ClassRegistry::new();
//! let heap = Heap::new();
//! let id = registry.allocate_id();
//! registry.register(Arc::new(ClassVersion::new(
//!     id,
//!     Generation::INITIAL,
//!     ClassKind::Instance,
//!     "com/example/App",
//!     vec![],
//!     vec![],
//!     None,
//!     vec![],
//!     0,
//!     0,
//! )))?;
//!
//! let coordinator = RedefineCoordinator::new(
//!     &registry,
//!     &heap,
//!     &EchoLoader,
//!     &HeapGc,
//!     &IdleStacks,
//!     &TokenComparator,
//!     &NullSink,
//! );
//!
//! let outcome = coordinator.submit(&[RedefinitionRequest {
//!     target: id,
//!     bytes: ReplacementBytes::new(vec![1]),
//! }])?;
//!
//! // The replacement was byte-identical, so the candidate was withdrawn
//! // and the heap never entered a safepoint.
//! assert_eq!(outcome.withdrawn, vec![id]);
//! assert!(outcome.redefined.is_empty());
//! # Ok::<(), hotswap::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of the commonly used types
//! - [`runtime`] - Class versions, lineages, the registry, the heap model
//!   and the collaborator seams
//! - [`redefine`] - The engine itself: coordinator, affected-set search,
//!   diff, layout planning, heap migration, link repair
//! - [`Error`] and [`Result`] - Error handling for the cancellable phases
//!
//! ### Transaction Shape
//!
//! [`redefine::coordinator::RedefineCoordinator::submit`] drives one batch
//! through `Validating → Loading → Diffing → Migrating → Finalizing`. All
//! loading, verification and diffing happens before the safepoint and any
//! error there rolls the whole batch back. The safepoint phases (heap
//! migration, link repair) cannot fail recoverably; integrity violations
//! inside them panic.
//!
//! ### Versioned Classes
//!
//! Each class identity ([`runtime::version::ClassId`]) owns a
//! [`runtime::lineage::Lineage`] of [`runtime::version::ClassVersion`]s.
//! Redefinition appends a generation; it never mutates an existing version
//! in place. Superseded versions are retired once no parked frame pins
//! their methods, and rollback is a truncation of the appended candidates.
//!
//! ## Error Handling
//!
//! All cancellable operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use hotswap::Error;
//!
//! # fn submit() -> hotswap::Result<()> { Ok(()) }
//! match submit() {
//!     Ok(()) => println!("committed"),
//!     Err(Error::UnsupportedHierarchyChange { class, removed }) => {
//!         println!("{class} no longer satisfies {removed}")
//!     }
//!     Err(e) => println!("rolled back: {e}"),
//! }
//! ```

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub mod prelude;
pub mod redefine;
pub mod runtime;

/// Failure sub-codes reported by the external class-file loader/verifier.
///
/// See [`ParseFailure`] for the closed set of sub-codes and
/// [`Error::ParseOrVerify`] for how they surface from a transaction.
pub use error::ParseFailure;

/// The error type for all fallible redefinition operations.
///
/// Any error returned from [`redefine::coordinator::RedefineCoordinator::submit`]
/// means the whole batch was rolled back and the runtime state is untouched.
///
/// # Example
///
/// ```rust,no_run
/// use hotswap::Error;
///
/// # fn submit() -> hotswap::Result<()> { Ok(()) }
/// match submit() {
///     Ok(()) => println!("committed"),
///     Err(Error::InvalidRequest(message)) => println!("bad request: {message}"),
///     Err(e) => println!("rolled back: {e}"),
/// }
/// ```
pub use error::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
