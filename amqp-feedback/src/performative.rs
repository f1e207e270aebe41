//! Performative and section bodies exchanged by the receiver, rebuilt from or
//! lowered into [`codec::Value`] trees.
//!
//! Only the fields this client reads or writes are modeled; everything else is
//! tolerated on decode and left at its wire default on encode.

use bytes::Bytes;

use crate::codec::{DecodeError, Described, Descriptor, Value};

/// Descriptor codes for the frame bodies and sections known to this crate
pub mod codes {
    pub const OPEN: u64 = 0x10;
    pub const BEGIN: u64 = 0x11;
    pub const ATTACH: u64 = 0x12;
    pub const FLOW: u64 = 0x13;
    pub const TRANSFER: u64 = 0x14;
    pub const DISPOSITION: u64 = 0x15;
    pub const DETACH: u64 = 0x16;
    pub const END: u64 = 0x17;
    pub const CLOSE: u64 = 0x18;

    pub const ERROR: u64 = 0x1d;

    pub const ACCEPTED: u64 = 0x24;
    pub const SOURCE: u64 = 0x28;
    pub const TARGET: u64 = 0x29;

    pub const SASL_MECHANISMS: u64 = 0x40;
    pub const SASL_INIT: u64 = 0x41;
    pub const SASL_CHALLENGE: u64 = 0x42;
    pub const SASL_RESPONSE: u64 = 0x43;
    pub const SASL_OUTCOME: u64 = 0x44;

    // message sections
    pub const HEADER: u64 = 0x70;
    pub const DELIVERY_ANNOTATIONS: u64 = 0x71;
    pub const MESSAGE_ANNOTATIONS: u64 = 0x72;
    pub const PROPERTIES: u64 = 0x73;
    pub const APPLICATION_PROPERTIES: u64 = 0x74;
    pub const DATA: u64 = 0x75;
    pub const AMQP_SEQUENCE: u64 = 0x76;
    pub const AMQP_VALUE: u64 = 0x77;
    pub const FOOTER: u64 = 0x78;
}

/// Resolves a descriptor to its numeric code, accepting the symbolic form
pub fn descriptor_code(descriptor: &Descriptor) -> Option<u64> {
    match descriptor {
        Descriptor::Code(code) => Some(*code),
        Descriptor::Name(name) => match name.as_str() {
            "amqp:open:list" => Some(codes::OPEN),
            "amqp:begin:list" => Some(codes::BEGIN),
            "amqp:attach:list" => Some(codes::ATTACH),
            "amqp:flow:list" => Some(codes::FLOW),
            "amqp:transfer:list" => Some(codes::TRANSFER),
            "amqp:disposition:list" => Some(codes::DISPOSITION),
            "amqp:detach:list" => Some(codes::DETACH),
            "amqp:end:list" => Some(codes::END),
            "amqp:close:list" => Some(codes::CLOSE),
            "amqp:error:list" => Some(codes::ERROR),
            "amqp:accepted:list" => Some(codes::ACCEPTED),
            "amqp:source:list" => Some(codes::SOURCE),
            "amqp:target:list" => Some(codes::TARGET),
            "amqp:sasl-mechanisms:list" => Some(codes::SASL_MECHANISMS),
            "amqp:sasl-init:list" => Some(codes::SASL_INIT),
            "amqp:sasl-challenge:list" => Some(codes::SASL_CHALLENGE),
            "amqp:sasl-response:list" => Some(codes::SASL_RESPONSE),
            "amqp:sasl-outcome:list" => Some(codes::SASL_OUTCOME),
            "amqp:header:list" => Some(codes::HEADER),
            "amqp:delivery-annotations:map" => Some(codes::DELIVERY_ANNOTATIONS),
            "amqp:message-annotations:map" => Some(codes::MESSAGE_ANNOTATIONS),
            "amqp:properties:list" => Some(codes::PROPERTIES),
            "amqp:application-properties:map" => Some(codes::APPLICATION_PROPERTIES),
            "amqp:data:binary" => Some(codes::DATA),
            "amqp:amqp-sequence:list" => Some(codes::AMQP_SEQUENCE),
            "amqp:amqp-value:*" => Some(codes::AMQP_VALUE),
            "amqp:footer:map" => Some(codes::FOOTER),
            _ => None,
        },
    }
}

/// Application-defined attach/open properties with symbol keys
pub type Fields = Vec<(String, Value)>;

/// 2.8.1 Role, a boolean on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// false
    Sender,

    /// true
    Receiver,
}

impl Role {
    fn from_value(value: Value, what: &'static str) -> Result<Self, DecodeError> {
        match opt_bool(value, what)?.unwrap_or(false) {
            true => Ok(Role::Receiver),
            false => Ok(Role::Sender),
        }
    }

    fn to_value(self) -> Value {
        Value::Bool(matches!(self, Role::Receiver))
    }
}

/// 2.8.14 Error carried by close/end/detach and SASL rejection descriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error condition symbol, e.g. `amqp:connection:forced`
    pub condition: String,

    /// Optional human readable description
    pub description: Option<String>,
}

impl ErrorInfo {
    /// Creates an error with the given condition and description
    pub fn new(condition: impl Into<String>, description: impl Into<Option<String>>) -> Self {
        Self {
            condition: condition.into(),
            description: description.into(),
        }
    }

    fn from_list(value: Value, what: &'static str) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, what)?;
        let condition =
            opt_sym(fields.next(), "error.condition")?.ok_or(DecodeError::Malformed("error.condition"))?;
        let description = opt_str(fields.next(), "error.description")?;
        Ok(Self {
            condition,
            description,
        })
    }

    fn to_value(&self) -> Value {
        described(
            codes::ERROR,
            vec![
                Value::Symbol(self.condition.clone()),
                v_str(&self.description),
                Value::Null,
            ],
        )
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} ({})", self.condition, description),
            None => write!(f, "{}", self.condition),
        }
    }
}

/// 2.7.1 Open
#[derive(Debug, Clone)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    pub idle_time_out: Option<u32>,
}

impl Open {
    pub fn to_value(&self) -> Value {
        described(
            codes::OPEN,
            vec![
                Value::String(self.container_id.clone()),
                v_str(&self.hostname),
                Value::Uint(self.max_frame_size),
                Value::Ushort(self.channel_max),
                v_u32(self.idle_time_out),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "open")?;
        Ok(Self {
            container_id: opt_str(fields.next(), "open.container-id")?
                .ok_or(DecodeError::Malformed("open.container-id"))?,
            hostname: opt_str(fields.next(), "open.hostname")?,
            max_frame_size: opt_u32(fields.next(), "open.max-frame-size")?.unwrap_or(u32::MAX),
            channel_max: opt_u16(fields.next(), "open.channel-max")?.unwrap_or(u16::MAX),
            idle_time_out: opt_u32(fields.next(), "open.idle-time-out")?,
        })
    }
}

/// 2.7.2 Begin
#[derive(Debug, Clone)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
}

impl Begin {
    pub fn to_value(&self) -> Value {
        described(
            codes::BEGIN,
            vec![
                match self.remote_channel {
                    Some(channel) => Value::Ushort(channel),
                    None => Value::Null,
                },
                Value::Uint(self.next_outgoing_id),
                Value::Uint(self.incoming_window),
                Value::Uint(self.outgoing_window),
                Value::Uint(self.handle_max),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "begin")?;
        Ok(Self {
            remote_channel: opt_u16(fields.next(), "begin.remote-channel")?,
            next_outgoing_id: opt_u32(fields.next(), "begin.next-outgoing-id")?
                .ok_or(DecodeError::Malformed("begin.next-outgoing-id"))?,
            incoming_window: opt_u32(fields.next(), "begin.incoming-window")?
                .ok_or(DecodeError::Malformed("begin.incoming-window"))?,
            outgoing_window: opt_u32(fields.next(), "begin.outgoing-window")?
                .ok_or(DecodeError::Malformed("begin.outgoing-window"))?,
            handle_max: opt_u32(fields.next(), "begin.handle-max")?.unwrap_or(u32::MAX),
        })
    }
}

/// 3.5.3 Source, reduced to its address
#[derive(Debug, Clone, Default)]
pub struct Source {
    pub address: Option<String>,
}

impl Source {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
        }
    }

    fn to_value(&self) -> Value {
        described(codes::SOURCE, vec![v_str(&self.address)])
    }

    fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "source")?;
        Ok(Self {
            address: opt_str(fields.next(), "source.address")?,
        })
    }
}

/// 3.5.4 Target, reduced to its address
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub address: Option<String>,
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
        }
    }

    fn to_value(&self) -> Value {
        described(codes::TARGET, vec![v_str(&self.address)])
    }

    fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "target")?;
        Ok(Self {
            address: opt_str(fields.next(), "target.address")?,
        })
    }
}

/// 2.7.3 Attach
#[derive(Debug, Clone)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: Option<u8>,
    pub rcv_settle_mode: Option<u8>,
    pub source: Option<Source>,
    pub target: Option<Target>,
    pub initial_delivery_count: Option<u32>,
    pub properties: Option<Fields>,
}

impl Attach {
    pub fn to_value(&self) -> Value {
        described(
            codes::ATTACH,
            vec![
                Value::String(self.name.clone()),
                Value::Uint(self.handle),
                self.role.to_value(),
                v_ubyte(self.snd_settle_mode),
                v_ubyte(self.rcv_settle_mode),
                self.source.as_ref().map(Source::to_value).unwrap_or(Value::Null),
                self.target.as_ref().map(Target::to_value).unwrap_or(Value::Null),
                Value::Null, // unsettled
                Value::Null, // incomplete-unsettled
                v_u32(self.initial_delivery_count),
                Value::Null, // max-message-size
                Value::Null, // offered-capabilities
                Value::Null, // desired-capabilities
                v_fields(&self.properties),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "attach")?;
        let name = opt_str(fields.next(), "attach.name")?
            .ok_or(DecodeError::Malformed("attach.name"))?;
        let handle = opt_u32(fields.next(), "attach.handle")?
            .ok_or(DecodeError::Malformed("attach.handle"))?;
        let role = Role::from_value(fields.next(), "attach.role")?;
        let snd_settle_mode = opt_ubyte(fields.next(), "attach.snd-settle-mode")?;
        let rcv_settle_mode = opt_ubyte(fields.next(), "attach.rcv-settle-mode")?;
        let source = opt_described(fields.next(), codes::SOURCE)?
            .map(|value| Source::from_list(value))
            .transpose()?;
        let target = opt_described(fields.next(), codes::TARGET)?
            .map(|value| Target::from_list(value))
            .transpose()?;
        fields.next(); // unsettled
        fields.next(); // incomplete-unsettled
        let initial_delivery_count = opt_u32(fields.next(), "attach.initial-delivery-count")?;
        fields.next(); // max-message-size
        fields.next(); // offered-capabilities
        fields.next(); // desired-capabilities
        let properties = opt_fields(fields.next(), "attach.properties")?;
        Ok(Self {
            name,
            handle,
            role,
            snd_settle_mode,
            rcv_settle_mode,
            source,
            target,
            initial_delivery_count,
            properties,
        })
    }
}

/// 2.7.4 Flow
#[derive(Debug, Clone)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
}

impl Flow {
    pub fn to_value(&self) -> Value {
        described(
            codes::FLOW,
            vec![
                v_u32(self.next_incoming_id),
                Value::Uint(self.incoming_window),
                Value::Uint(self.next_outgoing_id),
                Value::Uint(self.outgoing_window),
                v_u32(self.handle),
                v_u32(self.delivery_count),
                v_u32(self.link_credit),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "flow")?;
        Ok(Self {
            next_incoming_id: opt_u32(fields.next(), "flow.next-incoming-id")?,
            incoming_window: opt_u32(fields.next(), "flow.incoming-window")?
                .ok_or(DecodeError::Malformed("flow.incoming-window"))?,
            next_outgoing_id: opt_u32(fields.next(), "flow.next-outgoing-id")?
                .ok_or(DecodeError::Malformed("flow.next-outgoing-id"))?,
            outgoing_window: opt_u32(fields.next(), "flow.outgoing-window")?
                .ok_or(DecodeError::Malformed("flow.outgoing-window"))?,
            handle: opt_u32(fields.next(), "flow.handle")?,
            delivery_count: opt_u32(fields.next(), "flow.delivery-count")?,
            link_credit: opt_u32(fields.next(), "flow.link-credit")?,
        })
    }
}

/// 2.7.5 Transfer
#[derive(Debug, Clone)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: Option<bool>,
    pub more: bool,
    pub aborted: bool,
}

impl Transfer {
    pub fn to_value(&self) -> Value {
        described(
            codes::TRANSFER,
            vec![
                Value::Uint(self.handle),
                v_u32(self.delivery_id),
                v_bin(&self.delivery_tag),
                v_u32(self.message_format),
                v_bool(self.settled),
                Value::Bool(self.more),
                Value::Null, // rcv-settle-mode
                Value::Null, // state
                Value::Null, // resume
                Value::Bool(self.aborted),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "transfer")?;
        let handle = opt_u32(fields.next(), "transfer.handle")?
            .ok_or(DecodeError::Malformed("transfer.handle"))?;
        let delivery_id = opt_u32(fields.next(), "transfer.delivery-id")?;
        let delivery_tag = opt_bin(fields.next(), "transfer.delivery-tag")?;
        let message_format = opt_u32(fields.next(), "transfer.message-format")?;
        let settled = opt_bool(fields.next(), "transfer.settled")?;
        let more = opt_bool(fields.next(), "transfer.more")?.unwrap_or(false);
        fields.next(); // rcv-settle-mode
        fields.next(); // state
        fields.next(); // resume
        let aborted = opt_bool(fields.next(), "transfer.aborted")?.unwrap_or(false);
        Ok(Self {
            handle,
            delivery_id,
            delivery_tag,
            message_format,
            settled,
            more,
            aborted,
        })
    }
}

/// Terminal delivery outcome; receiving feedback only ever accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
}

impl Outcome {
    pub fn to_value(self) -> Value {
        match self {
            Outcome::Accepted => described(codes::ACCEPTED, Vec::new()),
        }
    }

    fn from_value(value: Value, what: &'static str) -> Result<Option<Self>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::Described(described) => {
                match descriptor_code(&described.descriptor) {
                    Some(codes::ACCEPTED) => Ok(Some(Outcome::Accepted)),
                    // other delivery states are never produced by this client
                    // and are irrelevant when echoed back
                    _ => Ok(None),
                }
            }
            _ => Err(DecodeError::Malformed(what)),
        }
    }
}

/// 2.7.6 Disposition
#[derive(Debug, Clone)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<Outcome>,
}

impl Disposition {
    pub fn to_value(&self) -> Value {
        described(
            codes::DISPOSITION,
            vec![
                self.role.to_value(),
                Value::Uint(self.first),
                v_u32(self.last),
                Value::Bool(self.settled),
                self.state.map(Outcome::to_value).unwrap_or(Value::Null),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "disposition")?;
        Ok(Self {
            role: Role::from_value(fields.next(), "disposition.role")?,
            first: opt_u32(fields.next(), "disposition.first")?
                .ok_or(DecodeError::Malformed("disposition.first"))?,
            last: opt_u32(fields.next(), "disposition.last")?,
            settled: opt_bool(fields.next(), "disposition.settled")?.unwrap_or(false),
            state: Outcome::from_value(fields.next(), "disposition.state")?,
        })
    }
}

/// 2.7.7 Detach
#[derive(Debug, Clone)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorInfo>,
}

impl Detach {
    pub fn to_value(&self) -> Value {
        described(
            codes::DETACH,
            vec![
                Value::Uint(self.handle),
                Value::Bool(self.closed),
                v_error(&self.error),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "detach")?;
        Ok(Self {
            handle: opt_u32(fields.next(), "detach.handle")?
                .ok_or(DecodeError::Malformed("detach.handle"))?,
            closed: opt_bool(fields.next(), "detach.closed")?.unwrap_or(false),
            error: opt_error(fields.next(), "detach.error")?,
        })
    }
}

/// 2.7.8 End
#[derive(Debug, Clone, Default)]
pub struct End {
    pub error: Option<ErrorInfo>,
}

impl End {
    pub fn to_value(&self) -> Value {
        described(codes::END, vec![v_error(&self.error)])
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "end")?;
        Ok(Self {
            error: opt_error(fields.next(), "end.error")?,
        })
    }
}

/// 2.7.9 Close
#[derive(Debug, Clone, Default)]
pub struct Close {
    pub error: Option<ErrorInfo>,
}

impl Close {
    pub fn to_value(&self) -> Value {
        described(codes::CLOSE, vec![v_error(&self.error)])
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "close")?;
        Ok(Self {
            error: opt_error(fields.next(), "close.error")?,
        })
    }
}

/// 5.3.3.1 SASL Mechanisms
#[derive(Debug, Clone)]
pub struct SaslMechanisms {
    pub sasl_server_mechanisms: Vec<String>,
}

impl SaslMechanisms {
    pub fn to_value(&self) -> Value {
        // a single mechanism may be sent as a plain symbol, but the general
        // form is what this client emits in tests and accepts from peers
        described(
            codes::SASL_MECHANISMS,
            vec![match self.sasl_server_mechanisms.as_slice() {
                [only] => Value::Symbol(only.clone()),
                _ => Value::Array(
                    self.sasl_server_mechanisms
                        .iter()
                        .cloned()
                        .map(Value::Symbol)
                        .collect(),
                ),
            }],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "sasl-mechanisms")?;
        let mechanisms = match fields.next() {
            Value::Null => Vec::new(),
            Value::Symbol(only) => vec![only],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Symbol(symbol) => Ok(symbol),
                    _ => Err(DecodeError::Malformed("sasl-mechanisms element")),
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(DecodeError::Malformed("sasl-mechanisms")),
        };
        Ok(Self {
            sasl_server_mechanisms: mechanisms,
        })
    }
}

/// 5.3.3.5 SASL Init
#[derive(Debug, Clone)]
pub struct SaslInit {
    pub mechanism: String,
    pub initial_response: Option<Bytes>,
    pub hostname: Option<String>,
}

impl SaslInit {
    pub fn to_value(&self) -> Value {
        described(
            codes::SASL_INIT,
            vec![
                Value::Symbol(self.mechanism.clone()),
                v_bin(&self.initial_response),
                v_str(&self.hostname),
            ],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "sasl-init")?;
        Ok(Self {
            mechanism: opt_sym(fields.next(), "sasl-init.mechanism")?
                .ok_or(DecodeError::Malformed("sasl-init.mechanism"))?,
            initial_response: opt_bin(fields.next(), "sasl-init.initial-response")?,
            hostname: opt_str(fields.next(), "sasl-init.hostname")?,
        })
    }
}

/// 5.3.3.6 SASL Outcome; code 0 is ok, everything else is a rejection
#[derive(Debug, Clone)]
pub struct SaslOutcome {
    pub code: u8,
    pub additional_data: Option<Bytes>,
}

impl SaslOutcome {
    /// sasl-code ok
    pub const OK: u8 = 0;

    pub fn to_value(&self) -> Value {
        described(
            codes::SASL_OUTCOME,
            vec![Value::Ubyte(self.code), v_bin(&self.additional_data)],
        )
    }

    pub fn from_list(value: Value) -> Result<Self, DecodeError> {
        let mut fields = FieldIter::new(value, "sasl-outcome")?;
        Ok(Self {
            code: opt_ubyte(fields.next(), "sasl-outcome.code")?
                .ok_or(DecodeError::Malformed("sasl-outcome.code"))?,
            additional_data: opt_bin(fields.next(), "sasl-outcome.additional-data")?,
        })
    }
}

/* ----------------------------- field helpers ----------------------------- */

/// Iterates over a described list's fields, yielding Null once the encoded
/// fields run out (trailing defaults are routinely omitted on the wire).
struct FieldIter(std::vec::IntoIter<Value>);

impl FieldIter {
    fn new(value: Value, what: &'static str) -> Result<Self, DecodeError> {
        match value {
            Value::List(items) => Ok(Self(items.into_iter())),
            Value::Null => Ok(Self(Vec::new().into_iter())),
            _ => Err(DecodeError::Malformed(what)),
        }
    }

    fn next(&mut self) -> Value {
        self.0.next().unwrap_or(Value::Null)
    }
}

fn described(code: u64, fields: Vec<Value>) -> Value {
    Value::Described(Box::new(Described::new(code, Value::List(fields))))
}

fn opt_str(value: Value, what: &'static str) -> Result<Option<String>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_sym(value: Value, what: &'static str) -> Result<Option<String>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Symbol(s) => Ok(Some(s)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_bin(value: Value, what: &'static str) -> Result<Option<Bytes>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Binary(b) => Ok(Some(b)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_bool(value: Value, what: &'static str) -> Result<Option<bool>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_ubyte(value: Value, what: &'static str) -> Result<Option<u8>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Ubyte(v) => Ok(Some(v)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_u16(value: Value, what: &'static str) -> Result<Option<u16>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Ushort(v) => Ok(Some(v)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_u32(value: Value, what: &'static str) -> Result<Option<u32>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Uint(v) => Ok(Some(v)),
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_fields(value: Value, what: &'static str) -> Result<Option<Fields>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Map(pairs) => {
            let mut fields = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                match key {
                    Value::Symbol(key) => fields.push((key, value)),
                    _ => return Err(DecodeError::Malformed(what)),
                }
            }
            Ok(Some(fields))
        }
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn opt_described(value: Value, expected: u64) -> Result<Option<Value>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Described(described) if descriptor_code(&described.descriptor) == Some(expected) => {
            Ok(Some(described.value))
        }
        _ => Err(DecodeError::Malformed("unexpected described value")),
    }
}

fn opt_error(value: Value, what: &'static str) -> Result<Option<ErrorInfo>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Described(described) if descriptor_code(&described.descriptor) == Some(codes::ERROR) => {
            ErrorInfo::from_list(described.value, what).map(Some)
        }
        _ => Err(DecodeError::Malformed(what)),
    }
}

fn v_str(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

fn v_bin(value: &Option<Bytes>) -> Value {
    match value {
        Some(b) => Value::Binary(b.clone()),
        None => Value::Null,
    }
}

fn v_bool(value: Option<bool>) -> Value {
    match value {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

fn v_ubyte(value: Option<u8>) -> Value {
    match value {
        Some(v) => Value::Ubyte(v),
        None => Value::Null,
    }
}

fn v_u32(value: Option<u32>) -> Value {
    match value {
        Some(v) => Value::Uint(v),
        None => Value::Null,
    }
}

fn v_fields(value: &Option<Fields>) -> Value {
    match value {
        Some(fields) => Value::Map(
            fields
                .iter()
                .map(|(key, value)| (Value::Symbol(key.clone()), value.clone()))
                .collect(),
        ),
        None => Value::Null,
    }
}

fn v_error(value: &Option<ErrorInfo>) -> Value {
    match value {
        Some(error) => error.to_value(),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_value, to_bytes};

    fn round_trip(value: Value) -> Value {
        let mut encoded = to_bytes(&value).unwrap();
        decode_value(&mut encoded).unwrap()
    }

    fn unwrap_list(value: Value, expected: u64) -> Value {
        match value {
            Value::Described(described) => {
                assert_eq!(descriptor_code(&described.descriptor), Some(expected));
                described.value
            }
            other => panic!("expected described value, got {:?}", other),
        }
    }

    #[test]
    fn test_open_round_trip() {
        let open = Open {
            container_id: "feedback-receiver-1".to_string(),
            hostname: Some("aaa".to_string()),
            max_frame_size: 256 * 1024,
            channel_max: 255,
            idle_time_out: None,
        };
        let decoded =
            Open::from_list(unwrap_list(round_trip(open.to_value()), codes::OPEN)).unwrap();
        assert_eq!(decoded.container_id, "feedback-receiver-1");
        assert_eq!(decoded.hostname.as_deref(), Some("aaa"));
        assert_eq!(decoded.max_frame_size, 256 * 1024);
        assert_eq!(decoded.channel_max, 255);
    }

    #[test]
    fn test_open_defaults_apply_to_omitted_fields() {
        // only container-id on the wire
        let value = described(codes::OPEN, vec![Value::String("c".to_string())]);
        let decoded = Open::from_list(unwrap_list(value, codes::OPEN)).unwrap();
        assert_eq!(decoded.max_frame_size, u32::MAX);
        assert_eq!(decoded.channel_max, u16::MAX);
        assert_eq!(decoded.hostname, None);
    }

    #[test]
    fn test_attach_round_trip_with_properties() {
        let attach = Attach {
            name: "feedback-receiver".to_string(),
            handle: 0,
            role: Role::Receiver,
            snd_settle_mode: None,
            rcv_settle_mode: Some(0),
            source: Some(Source::new("/messages/serviceBound/feedback")),
            target: Some(Target::new("/messages/serviceBound/feedback")),
            initial_delivery_count: None,
            properties: Some(vec![(
                "client-version".to_string(),
                Value::String("amqp-feedback/0.1.0".to_string()),
            )]),
        };
        let decoded =
            Attach::from_list(unwrap_list(round_trip(attach.to_value()), codes::ATTACH)).unwrap();
        assert_eq!(decoded.name, "feedback-receiver");
        assert_eq!(decoded.role, Role::Receiver);
        assert_eq!(
            decoded.source.unwrap().address.as_deref(),
            Some("/messages/serviceBound/feedback")
        );
        let properties = decoded.properties.unwrap();
        assert_eq!(properties[0].0, "client-version");
    }

    #[test]
    fn test_transfer_more_flag_defaults_false() {
        let value = described(
            codes::TRANSFER,
            vec![Value::Uint(0), Value::Uint(0), Value::Binary(Bytes::from_static(b"t"))],
        );
        let decoded = Transfer::from_list(unwrap_list(value, codes::TRANSFER)).unwrap();
        assert!(!decoded.more);
        assert!(!decoded.aborted);
    }

    #[test]
    fn test_disposition_accepted_round_trip() {
        let disposition = Disposition {
            role: Role::Receiver,
            first: 0,
            last: None,
            settled: true,
            state: Some(Outcome::Accepted),
        };
        let decoded = Disposition::from_list(unwrap_list(
            round_trip(disposition.to_value()),
            codes::DISPOSITION,
        ))
        .unwrap();
        assert_eq!(decoded.state, Some(Outcome::Accepted));
        assert!(decoded.settled);
        assert_eq!(decoded.first, 0);
    }

    #[test]
    fn test_sasl_mechanisms_single_symbol_and_array() {
        let single = described(codes::SASL_MECHANISMS, vec![Value::Symbol("PLAIN".to_string())]);
        let decoded =
            SaslMechanisms::from_list(unwrap_list(single, codes::SASL_MECHANISMS)).unwrap();
        assert_eq!(decoded.sasl_server_mechanisms, vec!["PLAIN"]);

        let multiple = described(
            codes::SASL_MECHANISMS,
            vec![Value::Array(vec![
                Value::Symbol("EXTERNAL".to_string()),
                Value::Symbol("PLAIN".to_string()),
            ])],
        );
        let decoded =
            SaslMechanisms::from_list(unwrap_list(multiple, codes::SASL_MECHANISMS)).unwrap();
        assert_eq!(decoded.sasl_server_mechanisms, vec!["EXTERNAL", "PLAIN"]);
    }

    #[test]
    fn test_close_with_error_condition() {
        let close = Close {
            error: Some(ErrorInfo::new(
                "amqp:unauthorized-access",
                Some("token expired".to_string()),
            )),
        };
        let decoded =
            Close::from_list(unwrap_list(round_trip(close.to_value()), codes::CLOSE)).unwrap();
        let error = decoded.error.unwrap();
        assert_eq!(error.condition, "amqp:unauthorized-access");
        assert_eq!(error.description.as_deref(), Some("token expired"));
    }
}
