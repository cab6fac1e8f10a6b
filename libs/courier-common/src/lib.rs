pub mod envelope;
pub mod id;

pub use envelope::{
    DecodeError, Envelope, EnvelopeError, Event, EventPayload, Payload, RawPayload,
    RebootEstablishPayload, ReservedTagError, UnknownEvent,
};
