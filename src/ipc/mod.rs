//! Local wire between the sidecar and the runtime.
//!
//! Both directions use the same framing: a 4-byte big-endian length prefix
//! followed by a UTF-8 JSON body. The request is a single envelope object;
//! the response is a JSON array of envelopes or a one-element error array.

pub mod codec;
