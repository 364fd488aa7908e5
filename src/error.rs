use thiserror::Error;

use crate::runtime::version::ClassId;

macro_rules! invalid_request {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidRequest($msg.to_string())
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidRequest(format!($fmt, $($arg)*))
    };
}

macro_rules! internal_error {
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Failure reported by the external class-file loader or verifier.
///
/// The redefinition engine never parses or verifies class bytes itself; it
/// consumes a [`crate::runtime::collaborators::ClassLoader`] and maps its
/// failures onto this closed set of sub-codes so the whole batch can be
/// rejected with a precise status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The replacement class file declares a version the runtime does not support.
    #[error("unsupported class file version")]
    UnsupportedVersion,

    /// The replacement bytes do not form a well-formed class file.
    #[error("malformed class file: {0}")]
    MalformedClass(String),

    /// The replacement class participates in a supertype cycle.
    #[error("circular supertype chain detected while loading replacement")]
    CircularSupertype,

    /// The replacement class file names a different class than the target.
    #[error("replacement names '{found}' but target is '{expected}'")]
    NameMismatch {
        /// Name of the class being redefined
        expected: String,
        /// Name found in the replacement bytes
        found: String,
    },

    /// The replacement class failed bytecode verification.
    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every error produced before the migration safepoint aborts the whole
/// redefinition batch atomically - the caller receives exactly one status
/// for the batch and the prior state is left untouched. Failures after the
/// safepoint are not representable here: once the heap pass has begun the
/// operation can no longer fail recoverably, and integrity violations in
/// that window abort the process instead.
///
/// # Error Categories
///
/// ## Request validation
/// - [`Error::InvalidRequest`] - Malformed, empty or duplicate request entries
/// - [`Error::UnmodifiableClass`] - Target cannot be redefined (primitive, array, mirror)
///
/// ## Loading and verification
/// - [`Error::ParseOrVerify`] - Propagated loader/verifier failure with sub-code
/// - [`Error::OutOfMemory`] - Allocation failure while loading replacements
///
/// ## Compatibility policy
/// - [`Error::UnsupportedHierarchyChange`] - Incompatible supertype/interface removal
///
/// ## Integrity
/// - [`Error::CircularClassDefinition`] - Defensive check in the topological sort
/// - [`Error::Internal`] - Invariant violation inside the engine
#[derive(Error, Debug)]
pub enum Error {
    /// The request set was malformed.
    ///
    /// Covers empty request collections, duplicate target identities within
    /// one batch, and targets that are not present in the class registry.
    #[error("invalid redefinition request: {0}")]
    InvalidRequest(String),

    /// The target class is not redefinable.
    ///
    /// Primitive classes, array classes and reflective mirrors cannot be
    /// redefined; their shape is fixed by the runtime.
    #[error("class {0} is not modifiable")]
    UnmodifiableClass(ClassId),

    /// The external loader or verifier rejected a replacement class.
    #[error("{0}")]
    ParseOrVerify(#[from] ParseFailure),

    /// The redefinition removes a supertype or interface that existing
    /// instances depend on.
    ///
    /// Removing an ancestor would invalidate the is-instance-of invariant
    /// for live instances, so the whole transaction is rejected.
    #[error("class {class} no longer satisfies supertype {removed}")]
    UnsupportedHierarchyChange {
        /// The class whose hierarchy changed
        class: ClassId,
        /// The ancestor or interface that would be removed
        removed: ClassId,
    },

    /// Allocation failed while loading or planning the redefinition.
    #[error("out of memory while preparing redefinition")]
    OutOfMemory,

    /// The affected-class set could not be topologically ordered.
    ///
    /// Well-formed loaded hierarchies cannot cycle; this is a defensive
    /// integrity check, not an expected failure mode.
    #[error("circular class definition detected in affected set")]
    CircularClassDefinition,

    /// Invariant violation inside the engine.
    ///
    /// The source location where the violation was detected is included
    /// for debugging purposes.
    #[error("Internal - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}
