use mirror_core::{
    AccountInformation, AccountUpdate, Deal, InstanceIndex, Order, PacketEvent, Position,
    PriceUpdate, ResyncScope, SymbolSpecification, SyncPacket,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ParseError;

/// Parse one synchronization packet from its JSON text
pub fn parse_packet_str(text: &str) -> Result<SyncPacket, ParseError> {
    let value: Value = serde_json::from_str(text)?;
    parse_packet(&value)
}

/// Parse one synchronization packet from a JSON object.
///
/// The `type` discriminant selects the payload shape; unrecognised types are
/// kept verbatim as [`PacketEvent::Unknown`]. `accountId` is mandatory.
pub fn parse_packet(value: &Value) -> Result<SyncPacket, ParseError> {
    let object = value.as_object().ok_or(ParseError::NotAnObject)?;

    let account_id = object
        .get("accountId")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingAccountId)?
        .to_string();
    let packet_type = object
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let instance_index = header::<u64>(object, "instanceIndex").and_then(|index| {
        let converted = InstanceIndex::try_from(index).ok();
        if converted.is_none() {
            warn!(%account_id, index, "instanceIndex out of range, using default instance");
        }
        converted
    });

    let event = parse_event(packet_type, object, value)?;

    Ok(SyncPacket {
        account_id,
        instance_index,
        host: header(object, "host"),
        sequence_number: header(object, "sequenceNumber"),
        sequence_timestamp: header(object, "sequenceTimestamp"),
        synchronization_id: header(object, "synchronizationId"),
        event,
    })
}

fn parse_event(
    packet_type: &str,
    object: &Map<String, Value>,
    value: &Value,
) -> Result<PacketEvent, ParseError> {
    let event = match packet_type {
        "authenticated" => PacketEvent::Authenticated {
            session_id: optional(object, "sessionId")?,
            replicas: optional(object, "replicas")?,
        },
        "disconnected" => PacketEvent::Disconnected,
        "synchronizationStarted" => PacketEvent::SynchronizationStarted(ResyncScope {
            specifications: optional(object, "specificationsUpdated")?.unwrap_or(true),
            positions: optional(object, "positionsUpdated")?.unwrap_or(true),
            orders: optional(object, "ordersUpdated")?.unwrap_or(true),
        }),
        "accountInformation" => {
            let info: Option<AccountInformation> = optional(object, "accountInformation")?;
            match info {
                Some(info) => PacketEvent::AccountInformation(info),
                None => unknown(packet_type, value),
            }
        }
        "positions" => PacketEvent::Positions(list::<Position>(object, "positions")?),
        "orders" => PacketEvent::Orders(list::<Order>(object, "orders")?),
        "update" => PacketEvent::Update(whole::<AccountUpdate>(value, "update")?),
        "historyOrders" => PacketEvent::HistoryOrders(list::<Order>(object, "historyOrders")?),
        "deals" => PacketEvent::Deals(list::<Deal>(object, "deals")?),
        "specifications" => PacketEvent::Specifications {
            specifications: list::<SymbolSpecification>(object, "specifications")?,
            removed_symbols: list::<String>(object, "removedSymbols")?,
        },
        "prices" => PacketEvent::Prices(whole::<PriceUpdate>(value, "prices")?),
        "status" => PacketEvent::Status {
            connected: optional(object, "connected")?.unwrap_or(false),
        },
        "dealSynchronizationFinished" => PacketEvent::DealSynchronizationFinished,
        "orderSynchronizationFinished" => PacketEvent::OrderSynchronizationFinished,
        _ => unknown(packet_type, value),
    };
    Ok(event)
}

fn unknown(packet_type: &str, value: &Value) -> PacketEvent {
    debug!(packet_type, "Unrecognised packet type, passing through");
    PacketEvent::Unknown {
        packet_type: packet_type.to_string(),
        payload: value.clone(),
    }
}

/// Field that may be absent or null
fn optional<T: DeserializeOwned>(
    object: &Map<String, Value>,
    field: &str,
) -> Result<Option<T>, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| invalid(field, e)),
    }
}

/// Envelope field. A malformed value is dropped so the packet still goes
/// through, unordered when the sequence fields are affected.
fn header<T: DeserializeOwned>(object: &Map<String, Value>, field: &str) -> Option<T> {
    optional(object, field).unwrap_or_else(|e| {
        warn!(field, error = %e, "Ignoring malformed packet header field");
        None
    })
}

/// Array field, empty when absent
fn list<T: DeserializeOwned>(
    object: &Map<String, Value>,
    field: &str,
) -> Result<Vec<T>, ParseError> {
    Ok(optional::<Vec<T>>(object, field)?.unwrap_or_default())
}

/// Payload spread over the packet's top-level fields
fn whole<T: DeserializeOwned>(value: &Value, packet_type: &str) -> Result<T, ParseError> {
    serde_json::from_value(value.clone()).map_err(|e| invalid(packet_type, e))
}

fn invalid(field: &str, error: serde_json::Error) -> ParseError {
    ParseError::InvalidField {
        field: field.to_string(),
        message: error.to_string(),
    }
}
