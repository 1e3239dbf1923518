//! Change classification for incoming definitions.

use super::{CompareOptions, Definition};

/// Action required to bring the stored definition in line with an incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCreationOption {
    /// Identical to the stored definition.
    Noop,
    /// Only formatting or the output limit changed; the compiled artifact stays.
    UpdateWithoutRecompile,
    /// Semantics changed; recompile under the existing id.
    Update,
    /// No definition with this name exists.
    Create,
}

impl IndexCreationOption {
    pub fn requires_compile(self) -> bool {
        matches!(self, Self::Update | Self::Create)
    }
}

/// Classifies `candidate` against the definition currently stored under its name.
///
/// On anything but `Create` the stored id is copied onto the candidate.
pub fn classify_change<D: Definition>(current: Option<&D>, candidate: &mut D) -> IndexCreationOption {
    let Some(current) = current else {
        return IndexCreationOption::Create;
    };

    candidate.set_id(current.id());
    if current.is_test() || candidate.is_test() {
        return IndexCreationOption::Update;
    }

    if current.equivalent(candidate, CompareOptions::EXACT) {
        return IndexCreationOption::Noop;
    }
    if current.equivalent(candidate, CompareOptions::RELAXED) {
        IndexCreationOption::UpdateWithoutRecompile
    } else {
        IndexCreationOption::Update
    }
}
