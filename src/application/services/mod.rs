//! Application Services

mod token_service;

pub use token_service::{
    RefreshError, SessionToken, TokenClaims, TokenIssueError, TokenRejected, TokenService,
    TokenType,
};
