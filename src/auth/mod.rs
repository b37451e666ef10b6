//! Authentication and cookie management.
//!
//! Cookies are cached in the Netscape cookie-file format and loaded into the
//! run's shared `reqwest` cookie jar.

mod cookies;
mod provider;

pub use cookies::{
    CookieError, CookieLine, add_cookies_to_jar, parse_netscape_cookies, write_netscape_cookies,
};
pub use provider::{AuthError, CredentialProvider, Credentials, SessionAuth};
