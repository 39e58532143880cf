use serde::{Deserialize, Serialize};

use super::datagram::{Datagram, DatagramError, DatagramIterator};

pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Leading u16 of every game datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    ClientHeartbeat = 0,
    ServerHeartbeat = 1,
    HelloResp = 2,
    ClientState = 3,
    Snapshot = 4,
    DeleteEntity = 5,
    ChangeLevel = 6,
    Tick = 7,
    Cmd = 8,
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::ClientHeartbeat,
            1 => Self::ServerHeartbeat,
            2 => Self::HelloResp,
            3 => Self::ClientState,
            4 => Self::Snapshot,
            5 => Self::DeleteEntity,
            6 => Self::ChangeLevel,
            7 => Self::Tick,
            8 => Self::Cmd,
            other => return Err(ProtocolError::UnknownMessage(other)),
        })
    }
}

/// Client loading state as reported in `CLIENT_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClientState {
    #[default]
    None = 0,
    Loading = 1,
    Playing = 2,
}

impl TryFrom<u8> for ClientState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Loading),
            2 => Ok(Self::Playing),
            other => Err(ProtocolError::InvalidClientState(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownMessage(u16),
    #[error("invalid client state {0}")]
    InvalidClientState(u8),
    #[error(transparent)]
    Datagram(#[from] DatagramError),
}

pub fn begin_message(msg: MessageType) -> Datagram {
    let mut dg = Datagram::new();
    dg.add_u16(msg as u16);
    dg
}

/// Reads the message tag, leaving the iterator at the payload.
pub fn read_message_type(dgi: &mut DatagramIterator<'_>) -> Result<MessageType, ProtocolError> {
    MessageType::try_from(dgi.get_u16()?)
}

/// Every non-snapshot message, decoded.
///
/// Snapshots are streamed straight into the entity list and never
/// materialised as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHeartbeat,
    ServerHeartbeat,
    HelloResp { client_id: u16, map: String },
    ClientState(ClientState),
    DeleteEntity { entity_id: u32 },
    ChangeLevel { map: String, is_transition: bool },
    Tick { tick: i32, interval_per_tick: f32 },
    Cmd(String),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ClientHeartbeat => MessageType::ClientHeartbeat,
            Self::ServerHeartbeat => MessageType::ServerHeartbeat,
            Self::HelloResp { .. } => MessageType::HelloResp,
            Self::ClientState(_) => MessageType::ClientState,
            Self::DeleteEntity { .. } => MessageType::DeleteEntity,
            Self::ChangeLevel { .. } => MessageType::ChangeLevel,
            Self::Tick { .. } => MessageType::Tick,
            Self::Cmd(_) => MessageType::Cmd,
        }
    }

    pub fn encode(&self) -> Result<Datagram, ProtocolError> {
        let mut dg = begin_message(self.message_type());
        match self {
            Self::ClientHeartbeat | Self::ServerHeartbeat => {}
            Self::HelloResp { client_id, map } => {
                dg.add_u16(*client_id);
                dg.add_string(map)?;
            }
            Self::ClientState(state) => dg.add_u8(*state as u8),
            Self::DeleteEntity { entity_id } => dg.add_u32(*entity_id),
            Self::ChangeLevel { map, is_transition } => {
                dg.add_string(map)?;
                dg.add_u8(*is_transition as u8);
            }
            Self::Tick {
                tick,
                interval_per_tick,
            } => {
                dg.add_i32(*tick);
                dg.add_f32(*interval_per_tick);
            }
            Self::Cmd(cmd) => dg.add_string(cmd)?,
        }
        Ok(dg)
    }

    /// Decodes the payload of a message whose tag has already been read.
    pub fn decode_payload(
        msg: MessageType,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<Option<Self>, ProtocolError> {
        let message = match msg {
            MessageType::ClientHeartbeat => Self::ClientHeartbeat,
            MessageType::ServerHeartbeat => Self::ServerHeartbeat,
            MessageType::HelloResp => Self::HelloResp {
                client_id: dgi.get_u16()?,
                map: dgi.get_string()?,
            },
            MessageType::ClientState => Self::ClientState(ClientState::try_from(dgi.get_u8()?)?),
            MessageType::DeleteEntity => Self::DeleteEntity {
                entity_id: dgi.get_u32()?,
            },
            MessageType::ChangeLevel => Self::ChangeLevel {
                map: dgi.get_string()?,
                is_transition: dgi.get_u8()? != 0,
            },
            MessageType::Tick => Self::Tick {
                tick: dgi.get_i32()?,
                interval_per_tick: dgi.get_f32()?,
            },
            MessageType::Cmd => Self::Cmd(dgi.get_string()?),
            MessageType::Snapshot => return Ok(None),
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(dg: &Datagram) -> Message {
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        let msg = read_message_type(&mut dgi).unwrap();
        Message::decode_payload(msg, &mut dgi).unwrap().unwrap()
    }

    #[test]
    fn hello_resp_layout() {
        let dg = Message::HelloResp {
            client_id: 3,
            map: "dm_lobby".into(),
        }
        .encode()
        .unwrap();

        let bytes = dg.as_bytes();
        assert_eq!(&bytes[..2], &(MessageType::HelloResp as u16).to_le_bytes());
        assert_eq!(&bytes[2..4], &3u16.to_le_bytes());
        assert_eq!(
            decode(&dg),
            Message::HelloResp {
                client_id: 3,
                map: "dm_lobby".into()
            }
        );
    }

    #[test]
    fn change_level_and_tick() {
        let change = Message::ChangeLevel {
            map: "c1a0".into(),
            is_transition: true,
        };
        assert_eq!(decode(&change.encode().unwrap()), change);

        let tick = Message::Tick {
            tick: 1200,
            interval_per_tick: 1.0 / 60.0,
        };
        assert_eq!(decode(&tick.encode().unwrap()), tick);
    }

    #[test]
    fn rejects_unknown_tag_and_state() {
        let mut dg = Datagram::new();
        dg.add_u16(999);
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        assert_eq!(
            read_message_type(&mut dgi),
            Err(ProtocolError::UnknownMessage(999))
        );

        let mut dg = begin_message(MessageType::ClientState);
        dg.add_u8(9);
        let mut dgi = DatagramIterator::new(dg.as_bytes());
        let msg = read_message_type(&mut dgi).unwrap();
        assert_eq!(
            Message::decode_payload(msg, &mut dgi),
            Err(ProtocolError::InvalidClientState(9))
        );
    }
}
