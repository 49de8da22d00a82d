pub mod dom_context;
pub mod event;
pub mod request;
pub mod tracer;

pub use dom_context::{DomContext, HtmlLocationType};
pub use event::{TracerEvent, TracerEventBulk};
pub use request::Request;
pub use tracer::{Tracer, TracerEdit};
