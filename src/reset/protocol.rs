//! Single-use password reset tokens.
//!
//! The directory has no token table, so a token lives inside the user record
//! as an entitlement of type `resetPassword`: `display` holds the token and
//! `value` is the consumed flag. `ResetTokenProtocol` keeps that encoding out
//! of the workflow.

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;

use crate::directory::{escape_filter_value, DirectoryUser, Entitlement, PatchOp, ENTITLEMENTS_PATH};
use crate::error::FacadeError;

pub const RESET_ENTITLEMENT_TYPE: &str = "resetPassword";
/// 128 bits.
pub const RESET_TOKEN_BYTES: usize = 16;

/// A freshly generated token and the writes that persist it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub patch: Vec<PatchOp>,
}

pub trait ResetTokenProtocol: Send + Sync {
    /// New token for `user`; the patch supersedes any outstanding one.
    fn issue(&self, user: &DirectoryUser) -> IssuedToken;

    /// Directory filter selecting the owner of `token`, `None` when the token
    /// cannot have been issued by this protocol.
    fn lookup_filter(&self, token: &str) -> Option<String>;

    /// Writes that mark `token` consumed on `user`.
    fn consume(&self, user: &DirectoryUser, token: &str) -> Result<Vec<PatchOp>, FacadeError>;

    fn is_consumed(&self, user: &DirectoryUser, token: &str) -> bool;
}

/// Reset tokens stored in the user's entitlement list.
#[derive(Debug, Clone, Default)]
pub struct EntitlementResetTokens;

impl EntitlementResetTokens {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_token() -> String {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn is_well_formed(token: &str) -> bool {
        token.len() == RESET_TOKEN_BYTES * 2
            && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Drops every earlier reset entitlement and appends a fresh, unconsumed one.
    pub fn issue_entitlements(entitlements: &[Entitlement]) -> (String, Vec<Entitlement>) {
        let token = Self::generate_token();
        let mut updated: Vec<Entitlement> = entitlements
            .iter()
            .filter(|e| e.entitlement_type != RESET_ENTITLEMENT_TYPE)
            .cloned()
            .collect();
        updated.push(Entitlement {
            entitlement_type: RESET_ENTITLEMENT_TYPE.to_owned(),
            display: token.clone(),
            value: false,
        });
        (token, updated)
    }

    /// The unconsumed entitlement carrying `token`.
    pub fn find<'a>(entitlements: &'a [Entitlement], token: &str) -> Result<&'a Entitlement, FacadeError> {
        let mut matching = entitlements
            .iter()
            .filter(|e| e.entitlement_type == RESET_ENTITLEMENT_TYPE && e.display == token);

        match matching.clone().find(|e| !e.value) {
            Some(entitlement) => Ok(entitlement),
            None if matching.next().is_some() => Err(FacadeError::TokenAlreadyUsed),
            None => Err(FacadeError::InvalidResetToken),
        }
    }

    /// Flags the matching entitlement consumed; a second call fails.
    pub fn consume_entitlements(entitlements: &[Entitlement], token: &str) -> Result<Vec<Entitlement>, FacadeError> {
        Self::find(entitlements, token)?;
        let mut consumed = false;
        let updated = entitlements
            .iter()
            .cloned()
            .map(|mut e| {
                if !consumed && e.entitlement_type == RESET_ENTITLEMENT_TYPE && e.display == token && !e.value {
                    e.value = true;
                    consumed = true;
                }
                e
            })
            .collect();
        Ok(updated)
    }

    fn replace_entitlements(entitlements: &[Entitlement]) -> PatchOp {
        PatchOp::replace(ENTITLEMENTS_PATH, json!(entitlements))
    }
}

impl ResetTokenProtocol for EntitlementResetTokens {
    fn issue(&self, user: &DirectoryUser) -> IssuedToken {
        let (token, entitlements) = Self::issue_entitlements(&user.entitlements);
        IssuedToken { token, patch: vec![Self::replace_entitlements(&entitlements)] }
    }

    fn lookup_filter(&self, token: &str) -> Option<String> {
        if !Self::is_well_formed(token) {
            return None;
        }
        Some(format!(
            "entitlements[type eq \"{}\" and display eq \"{}\"]",
            RESET_ENTITLEMENT_TYPE,
            escape_filter_value(token)
        ))
    }

    fn consume(&self, user: &DirectoryUser, token: &str) -> Result<Vec<PatchOp>, FacadeError> {
        let entitlements = Self::consume_entitlements(&user.entitlements, token)?;
        Ok(vec![Self::replace_entitlements(&entitlements)])
    }

    fn is_consumed(&self, user: &DirectoryUser, token: &str) -> bool {
        matches!(Self::find(&user.entitlements, token), Err(FacadeError::TokenAlreadyUsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entitlement(kind: &str, display: &str, value: bool) -> Entitlement {
        Entitlement { entitlement_type: kind.to_owned(), display: display.to_owned(), value }
    }

    fn unconsumed_count(entitlements: &[Entitlement]) -> usize {
        entitlements
            .iter()
            .filter(|e| e.entitlement_type == RESET_ENTITLEMENT_TYPE && !e.value)
            .count()
    }

    #[test]
    fn generated_tokens_are_32_hex_chars_and_distinct() {
        let a = EntitlementResetTokens::generate_token();
        let b = EntitlementResetTokens::generate_token();
        assert_eq!(a.len(), 32);
        assert!(EntitlementResetTokens::is_well_formed(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn issuing_twice_leaves_one_valid_token() {
        let others = vec![entitlement("role", "admin", true)];
        let (first, after_first) = EntitlementResetTokens::issue_entitlements(&others);
        let (second, after_second) = EntitlementResetTokens::issue_entitlements(&after_first);

        assert_eq!(unconsumed_count(&after_second), 1);
        assert!(after_second.contains(&entitlement("role", "admin", true)));
        assert!(EntitlementResetTokens::find(&after_second, &second).is_ok());
        assert_eq!(
            EntitlementResetTokens::find(&after_second, &first),
            Err(FacadeError::InvalidResetToken)
        );
    }

    #[test]
    fn consumed_token_cannot_be_consumed_again() {
        let (token, issued) = EntitlementResetTokens::issue_entitlements(&[]);
        let consumed = EntitlementResetTokens::consume_entitlements(&issued, &token).unwrap();

        assert_eq!(consumed[0].value, true);
        assert_eq!(
            EntitlementResetTokens::consume_entitlements(&consumed, &token),
            Err(FacadeError::TokenAlreadyUsed)
        );
    }

    #[test]
    fn find_ignores_other_entitlement_types() {
        let entitlements = vec![entitlement("coupon", "abc", false)];
        assert_eq!(
            EntitlementResetTokens::find(&entitlements, "abc"),
            Err(FacadeError::InvalidResetToken)
        );
    }

    #[test]
    fn lookup_filter_rejects_malformed_tokens() {
        let protocol = EntitlementResetTokens::new();
        assert!(protocol.lookup_filter("deadbeef").is_none());
        assert!(protocol.lookup_filter(r#"" or userName pr or ""#).is_none());
        let token = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            protocol.lookup_filter(token).unwrap(),
            format!("entitlements[type eq \"resetPassword\" and display eq \"{}\"]", token)
        );
    }

    #[test]
    fn issue_patch_replaces_entitlements() {
        let protocol = EntitlementResetTokens::new();
        let user = DirectoryUser {
            id: "u-1".into(),
            user_name: "ann".into(),
            emails: vec![],
            entitlements: vec![entitlement(RESET_ENTITLEMENT_TYPE, "old", false)],
            meta: None,
        };
        let issued = protocol.issue(&user);
        assert_eq!(issued.patch.len(), 1);
        assert_eq!(issued.patch[0].path, ENTITLEMENTS_PATH);
        let written: Vec<Entitlement> = serde_json::from_value(issued.patch[0].value.clone().unwrap()).unwrap();
        assert_eq!(written, vec![entitlement(RESET_ENTITLEMENT_TYPE, &issued.token, false)]);
    }
}
