//! Transaction coordinator - the single entry point for redefinition.
//!
//! `submit` drives one batch through its phases. Everything up to and
//! including the diff is cancellable: an error rolls the session back and
//! the caller receives exactly one status for the whole batch, with the
//! prior state untouched. Once the safepoint is taken the transaction is
//! past the point of no return; the migration and link-repair phases do not
//! return recoverable errors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::{
    redefine::{
        affected::find_sorted_affected,
        diff::diff_class,
        layout::plan_migration,
        link::repair_links,
        migrate::migrate_heap,
        session::RedefineSession,
    },
    runtime::{
        collaborators::{
            BodyComparator, ClassLoader, GcDelegate, RedefinitionRequest, RedefinitionSink,
            ReplacementBytes, StackScanner,
        },
        flags::RedefinitionFlags,
        heap::{Heap, Safepoint},
        registry::ClassRegistry,
        version::{ClassId, ClassVersion, Generation, VersionState},
    },
    Error, ParseFailure, Result,
};

/// Phase of the most recent transaction, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    /// No transaction has run yet
    Idle,
    /// Request-level validation
    Validating,
    /// Parsing and verifying candidate versions
    Loading,
    /// Classifying class pairs and planning migrations
    Diffing,
    /// Safepoint heap pass
    Migrating,
    /// Link repair and bookkeeping
    Finalizing,
    /// Last transaction committed
    Committed,
    /// Last transaction rolled back
    RolledBack,
}

/// Result of a committed transaction.
#[derive(Debug, Clone)]
pub struct RedefinitionOutcome {
    /// Classes whose new versions were installed, in topological order
    pub redefined: Vec<ClassId>,
    /// Candidates withdrawn because they were byte-identical to the
    /// current version
    pub withdrawn: Vec<ClassId>,
    /// Union of every installed candidate's diff flags
    pub flags: RedefinitionFlags,
}

/// Drives redefinition transactions against one registry and heap.
pub struct RedefineCoordinator<'a> {
    registry: &'a ClassRegistry,
    heap: &'a Heap,
    loader: &'a dyn ClassLoader,
    gc: &'a dyn GcDelegate,
    scanner: &'a dyn StackScanner,
    comparator: &'a dyn BodyComparator,
    sink: &'a dyn RedefinitionSink,
    phase: RwLock<Phase>,
}

impl<'a> RedefineCoordinator<'a> {
    /// Creates a coordinator wired to the given collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: &'a ClassRegistry,
        heap: &'a Heap,
        loader: &'a dyn ClassLoader,
        gc: &'a dyn GcDelegate,
        scanner: &'a dyn StackScanner,
        comparator: &'a dyn BodyComparator,
        sink: &'a dyn RedefinitionSink,
    ) -> Self {
        RedefineCoordinator {
            registry,
            heap,
            loader,
            gc,
            scanner,
            comparator,
            sink,
            phase: RwLock::new(Phase::Idle),
        }
    }

    /// The phase the most recent transaction reached.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *read_lock!(self.phase)
    }

    fn set_phase(&self, phase: Phase) {
        tracing::debug!(%phase, "redefinition phase");
        *write_lock!(self.phase) = phase;
    }

    /// Runs one redefinition batch to commit or rollback.
    ///
    /// # Errors
    ///
    /// Any error leaves the registry and heap exactly as they were before
    /// the call. See [`Error`] for the taxonomy.
    pub fn submit(&self, requests: &[RedefinitionRequest]) -> Result<RedefinitionOutcome> {
        self.set_phase(Phase::Validating);
        if let Err(error) = self.validate(requests) {
            self.set_phase(Phase::RolledBack);
            return Err(error);
        }

        let mut session = RedefineSession::begin(self.registry, self.heap);
        let withdrawn = match self.prepare(&mut session, requests) {
            Ok(withdrawn) => withdrawn,
            Err(error) => {
                session.rollback();
                self.set_phase(Phase::RolledBack);
                return Err(error);
            }
        };

        let redefined = session.affected().to_vec();
        if redefined.is_empty() {
            // Every candidate proved identical; nothing to install.
            self.set_phase(Phase::Committed);
            return Ok(RedefinitionOutcome {
                redefined,
                withdrawn,
                flags: session.max_flags(),
            });
        }

        self.set_phase(Phase::Migrating);
        let safepoint = Safepoint::take();
        migrate_heap(&mut session, &safepoint, self.gc, self.scanner);

        self.set_phase(Phase::Finalizing);
        repair_links(self.registry, &safepoint);
        drop(safepoint);

        for &id in &redefined {
            if let Some(lineage) = self.registry.lineage(id) {
                lineage.increment_redefined_count();
            }
        }
        self.sink.classes_redefined(&redefined);
        self.set_phase(Phase::Committed);

        tracing::info!(
            redefined = redefined.len(),
            withdrawn = withdrawn.len(),
            "redefinition committed"
        );
        Ok(RedefinitionOutcome {
            redefined,
            withdrawn,
            flags: session.max_flags(),
        })
    }

    fn validate(&self, requests: &[RedefinitionRequest]) -> Result<()> {
        if requests.is_empty() {
            return Err(invalid_request!("empty redefinition batch"));
        }
        let mut seen = HashSet::new();
        for request in requests {
            if !seen.insert(request.target) {
                return Err(invalid_request!(
                    "class {} appears twice in one batch",
                    request.target
                ));
            }
            if request.bytes.is_empty() {
                return Err(invalid_request!(
                    "empty replacement bytes for class {}",
                    request.target
                ));
            }
            let Some(current) = self.registry.newest(request.target) else {
                return Err(invalid_request!("class {} is not loaded", request.target));
            };
            if !current.kind.is_modifiable() {
                return Err(Error::UnmodifiableClass(request.target));
            }
        }
        Ok(())
    }

    /// Loading and diffing. Returns the withdrawn (byte-identical) ids.
    fn prepare(
        &self,
        session: &mut RedefineSession<'a>,
        requests: &[RedefinitionRequest],
    ) -> Result<Vec<ClassId>> {
        self.set_phase(Phase::Loading);

        // Requested replacements are parsed up front so the affected search
        // sees the new hierarchy of every explicitly requested class. The
        // up-front candidates only feed the sort; the installed candidates
        // are parsed again below, in topological order, so each one is
        // built against its ancestors' new shapes.
        let requested: Vec<ClassId> = requests.iter().map(|r| r.target).collect();
        let mut parsed: HashMap<ClassId, Arc<ClassVersion>> = HashMap::new();
        let mut bytes_of: HashMap<ClassId, &ReplacementBytes> = HashMap::new();
        for request in requests {
            let old = self
                .registry
                .newest(request.target)
                .ok_or_else(|| internal_error!("validated class {} vanished", request.target))?;
            let candidate = self.load_candidate(&old, &request.bytes)?;
            parsed.insert(old.id, candidate);
            bytes_of.insert(old.id, &request.bytes);
        }

        let affected = find_sorted_affected(session, &requested, &parsed)?;
        session.set_affected(affected.clone());

        for id in affected {
            let old = self
                .registry
                .newest(id)
                .ok_or_else(|| internal_error!("affected class {id} vanished"))?;
            let candidate = match bytes_of.get(&id) {
                Some(bytes) => self.load_candidate(&old, bytes)?,
                None => {
                    // Indirectly affected: rebuilt from its current
                    // definition against the new hierarchy.
                    let bytes = self.loader.reconstitute(&old)?;
                    self.load_candidate(&old, &bytes)?
                }
            };
            self.loader.verify(&candidate)?;
            candidate.set_state(VersionState::Redefining);
            candidate.set_mirror(self.heap.alloc_mirror(id, candidate.generation));
            session.attach_candidate(candidate);
        }

        self.set_phase(Phase::Diffing);
        let mut withdrawn = Vec::new();
        for id in session.affected().to_vec() {
            let candidate = session
                .candidate(id)
                .ok_or_else(|| internal_error!("no candidate attached for {id}"))?;
            let lineage = self
                .registry
                .lineage(id)
                .ok_or_else(|| internal_error!("no lineage for {id}"))?;
            let old = lineage
                .version(Generation(candidate.generation.0 - 1))
                .ok_or_else(|| internal_error!("no prior version for {id}"))?;

            let outcome = diff_class(session, &old, &candidate, self.comparator)?;

            if outcome.flags.shape_changes().is_empty()
                && outcome.method_changes.is_empty()
                && old.same_shape(&candidate)
            {
                tracing::debug!(class = %id, "candidate identical, withdrawing");
                session.withdraw_candidate(id);
                withdrawn.push(id);
                continue;
            }

            if outcome.flags.contains(RedefinitionFlags::MODIFY_INSTANCES) {
                let plan = plan_migration(&old, &candidate)?;
                candidate.set_migration(plan.program, plan.copies_backwards);
            }
            candidate.set_flags(outcome.flags);
            session.union_max_flags(outcome.flags);
            session.record_method_changes(id, outcome.method_changes);
        }

        Ok(withdrawn)
    }

    fn load_candidate(
        &self,
        old: &ClassVersion,
        bytes: &ReplacementBytes,
    ) -> Result<Arc<ClassVersion>> {
        let raw = self.loader.parse(old, bytes, self.registry)?;
        if raw.name != old.name {
            return Err(ParseFailure::NameMismatch {
                expected: old.name.clone(),
                found: raw.name,
            }
            .into());
        }
        Ok(Arc::new(raw.adopt_identity(old.id, old.generation.next())))
    }
}
