//! Ownership resolution over the closed set of companion capabilities.
//!
//! Every tracked object family expresses ownership one of three ways. The
//! engine adapter reports which one; this module decides who, if anyone,
//! owns the object, and how it is released.

use serde::{Deserialize, Serialize};

use crate::types::{CompanionKind, OwnerId};

/// How an object records its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// The object carries an owner field directly.
    Tamed {
        /// Recorded owner, if tamed.
        owner: Option<OwnerId>,
    },
    /// Mount families that track a tamed flag and an owner separately.
    Harnessed {
        /// Whether the tamed flag is set.
        tamed: bool,
        /// Recorded owner.
        owner: Option<OwnerId>,
    },
    /// No persistent owner: whoever rides the saddled object owns it for now.
    /// Ownership ends on dismount.
    RiddenSaddle {
        /// Whether a saddle is fitted.
        saddled: bool,
        /// Current rider.
        rider: Option<OwnerId>,
    },
}

impl Capability {
    /// The owner this capability currently resolves to.
    #[must_use]
    pub const fn owner(&self) -> Option<OwnerId> {
        match *self {
            Self::Tamed { owner } => owner,
            Self::Harnessed { tamed: true, owner } => owner,
            Self::Harnessed { tamed: false, .. } => None,
            Self::RiddenSaddle { saddled: true, rider } => rider,
            Self::RiddenSaddle { saddled: false, .. } => None,
        }
    }

    /// Whether `candidate` owns the object.
    #[must_use]
    pub fn is_owned_by(&self, candidate: OwnerId) -> bool {
        self.owner() == Some(candidate)
    }
}

/// What `setfree` does to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleasePlan {
    /// Clear tamed, owner, sitting, target and name.
    ClearTamed,
    /// Strip every ownership tag from a known mount family and clear its name.
    StripOwnership,
    /// The family's tags cannot be cleared reliably; remove the object.
    Destroy,
}

/// Choose how to release a companion of `kind`. `builtin_family` says
/// whether a mount belongs to a family whose tags are understood.
#[must_use]
pub const fn release_plan(kind: CompanionKind, builtin_family: bool) -> ReleasePlan {
    match kind {
        CompanionKind::Pet => ReleasePlan::ClearTamed,
        CompanionKind::Mount if builtin_family => ReleasePlan::StripOwnership,
        CompanionKind::Mount => ReleasePlan::Destroy,
    }
}
