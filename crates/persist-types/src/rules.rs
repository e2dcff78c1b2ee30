//! Legality rules shared by the verifier and the ledger's lazy revalidation.

use crate::address::Address;
use crate::primitive::Summary;
use crate::rejection::{ErrorKind, Rejection};

/// A static or dynamic binding may only target a container.
pub fn check_binding_target(target: &Summary) -> Result<(), Rejection> {
    if target.kind().is_bindable() {
        Ok(())
    } else {
        Err(Rejection::new(
            ErrorKind::InvalidTarget,
            format!("bindings cannot target a {}", target.kind()),
        ))
    }
}

/// A debinding may only target bindings, debindings and requests.
pub fn check_debinding_target(target: &Summary) -> Result<(), Rejection> {
    if target.kind().is_debindable() {
        Ok(())
    } else {
        Err(Rejection::new(
            ErrorKind::InvalidTarget,
            format!("debindings cannot target a {}", target.kind()),
        ))
    }
}

/// The debinding author must be the target's author, or its recipient when
/// the target is a request.
pub fn check_debinding_author(author: Address, target: &Summary) -> Result<(), Rejection> {
    match target.debinder() {
        Some(debinder) if debinder == author => Ok(()),
        _ => Err(Rejection::new(
            ErrorKind::InconsistentAuthor,
            format!(
                "debinding author {} does not control {}",
                author.short_hex(),
                target.address().short_hex()
            ),
        )),
    }
}

/// Full check for a debinding against a known target.
pub fn check_debinding(author: Address, target: &Summary) -> Result<(), Rejection> {
    check_debinding_target(target)?;
    check_debinding_author(author, target)
}
