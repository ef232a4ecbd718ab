//! Write-permission rules for reviews, platforms and owned resources.
//!
//! Every rule lets read-only access through unconditionally; anonymous
//! actors (`None`) never pass a write check.

use axum::http::Method;

use crate::models::{Review, User};

/// Whether a request only reads state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Write,
}

impl Access {
    /// GET, HEAD and OPTIONS are read-only; every other method writes
    pub fn from_method(method: &Method) -> Self {
        if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
            Access::ReadOnly
        } else {
            Access::Write
        }
    }

    pub fn is_read_only(self) -> bool {
        self == Access::ReadOnly
    }
}

/// The kind of resource a permission check is about
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Review(&'a Review),
    Platform,
    Owned { owner: i64 },
}

/// Dispatches to the rule for the given resource kind
pub fn is_permitted(actor: Option<&User>, resource: Resource<'_>, access: Access) -> bool {
    match resource {
        Resource::Review(review) => can_modify_review(review, actor, access),
        Resource::Platform => can_modify_platform(actor, access),
        Resource::Owned { owner } => can_modify_generic(owner, actor, access),
    }
}

/// Reviews may be changed by their author or by staff
pub fn can_modify_review(review: &Review, actor: Option<&User>, access: Access) -> bool {
    access.is_read_only()
        || actor.is_some_and(|user| user.id == review.review_user_id || user.is_staff)
}

/// Platforms may only be changed by staff
pub fn can_modify_platform(actor: Option<&User>, access: Access) -> bool {
    access.is_read_only() || actor.is_some_and(|user| user.is_staff)
}

/// Owned resources may only be changed by their owner
pub fn can_modify_generic(owner: i64, actor: Option<&User>, access: Access) -> bool {
    access.is_read_only() || actor.is_some_and(|user| user.id == owner)
}
