mod body;
mod cache_override;
mod dictionary;
mod engine;
mod error;
mod event;
mod fastly;
mod fetch;
mod geo;
mod headers;
pub mod host;
mod logger;
mod message;
mod native;
mod random;
mod request;
mod response;
mod runtime;
mod streams;
mod text;
mod transform;
mod urls;

pub use cache_override::{CacheOverride, CacheOverrideMode};
pub use dictionary::Dictionary;
pub use engine::{PromiseId, PromiseOutcome, Value};
pub use error::{GeataError, GeataErrorKind, GuestErrorType};
pub use event::FetchState;
pub use headers::{HeadersId, HeadersMode};
pub use logger::{ConsoleLevel, Logger};
pub use message::{BodyInit, BodyOwner, RequestId, ResponseId};
pub use request::RequestInit;
pub use response::ResponseInit;
pub use runtime::Runtime;
pub use streams::{StreamId, WritableId};
pub use text::{TextDecoder, TextEncoder};
pub use transform::{FlushFn, TransformFn, TransformId, Transformer};
pub use url::Url;
pub use urls::UrlSearchParams;
