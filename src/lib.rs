//! Stubwire HTTP Stub Server
//!
//! An HTTP/1.1 stub server for tests: register request patterns with canned
//! responses, point a client at the server, and every request is answered by
//! the first stub that matches it.
//!
//! # Features
//!
//! - **Request Matching**: Method, exact or regex URL, headers, cookies, query
//!   parameters, basic auth, and body matchers (string, regex, JSON, JSON path,
//!   XML, XPath with namespaces)
//! - **Priorities**: Lower priority numbers win; ties go to registration order
//! - **Responses**: Status codes and custom reason phrases, ordered headers,
//!   text, JSON, binary or file-backed bodies, redirects
//! - **Dynamic Templates**: Handlebars rendering with the request as context
//! - **Admin API**: List, add and remove stubs over HTTP under `/__admin`
//!
//! # Example
//!
//! ```no_run
//! use stubwire::{MockServer, RequestPattern, ResponseTemplate, ServerConfig, ValueMatcher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockServer::start(ServerConfig::dynamic()).await?;
//! server.stub(
//!     RequestPattern::get()
//!         .url("/api/message?id=1")
//!         .header("Accept", ValueMatcher::containing("/json")),
//!     ResponseTemplate::ok().json_body(serde_json::json!({"message": "Hello World!"})),
//! )?;
//!
//! let url = server.url("/api/message?id=1");
//! // ... issue requests against `url` ...
//! server.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! port: dynamic
//! stubs:
//!   - name: hello-world
//!     request:
//!       method: GET
//!       url_path: /hello
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           message: "Hello, World!"
//! ```

pub mod admin;
pub mod config;
pub mod engine;
pub mod error;
pub mod json;
pub mod matcher;
pub mod pattern;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;
pub mod template;
pub mod xml;

pub use config::{GlobalSettings, PortSetting, ServerConfig};
pub use error::{RegistrationError, RenderError, ServerError};
pub use matcher::ValueMatcher;
pub use pattern::{RequestMethod, RequestPattern};
pub use registry::{StubDefinition, StubId, StubMapping, StubRegistry};
pub use request::RequestDescriptor;
pub use response::{ResponseBody, ResponseTemplate};
pub use server::MockServer;
