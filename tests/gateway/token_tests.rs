//! Token Service Tests
//!
//! Stateless verification across processes and the exact expiry boundary.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use relay_gateway::application::services::{TokenRejected, TokenService, TokenType};
use relay_gateway::domain::{Identity, IdentityId, InMemoryIdentityStore, Scope};

use crate::common::jwt_settings;

fn identity() -> Identity {
    Identity::new(IdentityId(100), "rae")
}

#[test]
fn any_node_with_the_shared_secret_verifies_tokens() {
    // Two services stand in for two gateway processes.
    let issuer = TokenService::new(&jwt_settings());
    let verifier = TokenService::new(&jwt_settings());

    let token = issuer.issue(&identity(), TokenType::Access).unwrap();
    let claims = verifier.verify(&token.token, TokenType::Access).unwrap();

    assert_eq!(claims.identity_id().unwrap(), IdentityId(100));
}

#[test]
fn token_is_valid_at_expiry_and_rejected_one_second_later() {
    let svc = TokenService::new(&jwt_settings());
    let issued_at = Utc::now();
    let token = svc.issue_at(&identity(), TokenType::Access, issued_at).unwrap();

    let at_expiry = token.expires_at;
    assert!(svc.verify_at(&token.token, TokenType::Access, at_expiry).is_ok());

    let just_after = at_expiry + Duration::seconds(1);
    assert_eq!(
        svc.verify_at(&token.token, TokenType::Access, just_after)
            .unwrap_err(),
        TokenRejected::Expired
    );
}

#[test]
fn scopes_survive_the_token_round_trip() {
    let svc = TokenService::new(&jwt_settings());
    let admin = Identity::new(IdentityId(1), "ops").with_scopes([Scope::Publish, Scope::System]);

    let token = svc.issue(&admin, TokenType::Access).unwrap();
    let claims = svc.verify(&token.token, TokenType::Access).unwrap();

    assert!(claims.scopes.contains(&Scope::System));
}

#[test]
fn refresh_tokens_cannot_open_sessions() {
    let svc = TokenService::new(&jwt_settings());
    let token = svc.issue(&identity(), TokenType::Refresh).unwrap();

    assert_eq!(
        svc.verify(&token.token, TokenType::Access).unwrap_err(),
        TokenRejected::WrongType
    );
}

#[tokio::test]
async fn refresh_keeps_the_refresh_token_and_yields_a_new_access_token() {
    let svc = TokenService::new(&jwt_settings());
    let store = InMemoryIdentityStore::new();
    store.insert(identity());

    let refresh = svc.issue(&identity(), TokenType::Refresh).unwrap();

    let first = svc.refresh(&refresh.token, &store).await.unwrap();
    let second = svc.refresh(&refresh.token, &store).await.unwrap();

    assert_eq!(first.token_type, TokenType::Access);
    assert_eq!(second.token_type, TokenType::Access);
    assert!(svc.verify(&second.token, TokenType::Access).is_ok());
}

#[test]
fn tampered_tokens_are_rejected_as_bad_signature() {
    let svc = TokenService::new(&jwt_settings());
    let token = svc.issue(&identity(), TokenType::Access).unwrap();

    // Flip the last character of the signature segment.
    let mut tampered = token.token.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'A' { 'B' } else { 'A' });

    let err = svc.verify(&tampered, TokenType::Access).unwrap_err();
    assert!(matches!(
        err,
        TokenRejected::BadSignature | TokenRejected::Malformed
    ));
}
