//! Consensus message bodies and their byte-tagged envelope.

use neo2_core::{Transaction, UInt160, UInt256};
use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};

const MAX_TX_HASHES: usize = 65535;
const MAX_COMPACTS: usize = 1024;
const SIGNATURE_SIZE: usize = 64;

/// Message discriminator bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ChangeView = 0x00,
    PrepareRequest = 0x20,
    PrepareResponse = 0x21,
    Commit = 0x30,
    RecoveryRequest = 0x40,
    RecoveryMessage = 0x41,
}

impl MessageType {
    /// Parses a discriminator byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::ChangeView),
            0x20 => Some(Self::PrepareRequest),
            0x21 => Some(Self::PrepareResponse),
            0x30 => Some(Self::Commit),
            0x40 => Some(Self::RecoveryRequest),
            0x41 => Some(Self::RecoveryMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChangeView => "ChangeView",
            Self::PrepareRequest => "PrepareRequest",
            Self::PrepareResponse => "PrepareResponse",
            Self::Commit => "Commit",
            Self::RecoveryRequest => "RecoveryRequest",
            Self::RecoveryMessage => "RecoveryMessage",
        };
        f.write_str(name)
    }
}

/// View-change request. The target view is always `view_number + 1` and is
/// not carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeView {
    pub new_view_number: u8,
    pub timestamp: u32,
}

/// The primary's block proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    pub timestamp: u32,
    pub nonce: u64,
    pub next_consensus: UInt160,
    pub transaction_hashes: Vec<UInt256>,
    pub miner_tx: Transaction,
    /// Signature over the predicted state root; present only when
    /// state-root voting is enabled.
    pub state_root_sig: Option<[u8; SIGNATURE_SIZE]>,
}

/// A backup's acknowledgement of the proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareResponse {
    pub preparation_hash: UInt256,
    pub state_root_sig: Option<[u8; SIGNATURE_SIZE]>,
}

/// A signature over the final block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub signature: [u8; SIGNATURE_SIZE],
}

/// A request for everything the responder has collected this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub timestamp: u32,
}

/// Compact change-view evidence inside a recovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeViewCompact {
    pub validator_index: u16,
    pub original_view_number: u8,
    pub timestamp: u32,
    pub invocation_script: Vec<u8>,
}

impl Serializable for ChangeViewCompact {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.validator_index);
        writer.write_u8(self.original_view_number);
        writer.write_u32(self.timestamp);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(ChangeViewCompact {
            validator_index: reader.read_u16()?,
            original_view_number: reader.read_u8()?,
            timestamp: reader.read_u32()?,
            invocation_script: reader.read_var_bytes(1024)?,
        })
    }
}

/// Compact preparation evidence inside a recovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparationCompact {
    pub validator_index: u16,
    pub invocation_script: Vec<u8>,
}

impl Serializable for PreparationCompact {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.validator_index);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(PreparationCompact {
            validator_index: reader.read_u16()?,
            invocation_script: reader.read_var_bytes(1024)?,
        })
    }
}

/// Compact commit evidence inside a recovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCompact {
    pub view_number: u8,
    pub validator_index: u16,
    pub signature: [u8; SIGNATURE_SIZE],
    pub invocation_script: Vec<u8>,
}

impl Serializable for CommitCompact {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.view_number);
        writer.write_u16(self.validator_index);
        writer.write_bytes(&self.signature);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(CommitCompact {
            view_number: reader.read_u8()?,
            validator_index: reader.read_u16()?,
            signature: reader.read_array::<SIGNATURE_SIZE>()?,
            invocation_script: reader.read_var_bytes(1024)?,
        })
    }
}

/// Everything one validator collected for `(height, view)`, witnesses
/// included, so a lagging peer can catch up without replaying phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryMessage {
    pub change_views: Vec<ChangeViewCompact>,
    pub prepare_request: Option<PrepareRequest>,
    /// Set when the request itself is unavailable but its hash is known.
    pub preparation_hash: Option<UInt256>,
    pub preparations: Vec<PreparationCompact>,
    pub commits: Vec<CommitCompact>,
}

/// One consensus message: type tag, view, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    ChangeView(ChangeView),
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Commit(Commit),
    RecoveryRequest(RecoveryRequest),
    RecoveryMessage(RecoveryMessage),
}

impl ConsensusMessage {
    /// The wire discriminator for this body.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ChangeView(_) => MessageType::ChangeView,
            Self::PrepareRequest(_) => MessageType::PrepareRequest,
            Self::PrepareResponse(_) => MessageType::PrepareResponse,
            Self::Commit(_) => MessageType::Commit,
            Self::RecoveryRequest(_) => MessageType::RecoveryRequest,
            Self::RecoveryMessage(_) => MessageType::RecoveryMessage,
        }
    }

    /// Encodes `type · view_number · body`. `state_root_enabled` governs
    /// the optional state-root signatures.
    pub fn to_bytes(&self, view_number: u8, state_root_enabled: bool) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer.write_u8(self.message_type() as u8);
        writer.write_u8(view_number);
        match self {
            Self::ChangeView(cv) => {
                writer.write_u32(cv.timestamp);
            }
            Self::PrepareRequest(req) => {
                write_prepare_request(&mut writer, req, state_root_enabled);
            }
            Self::PrepareResponse(resp) => {
                writer.write_serializable(&resp.preparation_hash);
                if state_root_enabled {
                    writer.write_bytes(&resp.state_root_sig.unwrap_or([0u8; SIGNATURE_SIZE]));
                }
            }
            Self::Commit(commit) => {
                writer.write_bytes(&commit.signature);
            }
            Self::RecoveryRequest(req) => {
                writer.write_u32(req.timestamp);
            }
            Self::RecoveryMessage(recovery) => {
                writer.write_serializable_list(&recovery.change_views);
                match &recovery.prepare_request {
                    Some(req) => {
                        writer.write_bool(true);
                        write_prepare_request(&mut writer, req, state_root_enabled);
                    }
                    None => {
                        writer.write_bool(false);
                        match &recovery.preparation_hash {
                            Some(hash) => {
                                writer.write_bool(true);
                                writer.write_serializable(hash);
                            }
                            None => writer.write_bool(false),
                        }
                    }
                }
                writer.write_serializable_list(&recovery.preparations);
                writer.write_serializable_list(&recovery.commits);
            }
        }
        writer.into_bytes()
    }

    /// Decodes a message, returning it with its view number.
    pub fn from_bytes(data: &[u8], state_root_enabled: bool) -> neo2_io::Result<(Self, u8)> {
        let mut reader = MemoryReader::new(data);
        let type_byte = reader.read_u8()?;
        let message_type = MessageType::from_byte(type_byte)
            .ok_or_else(|| IoError::decoding("consensus message", format!("type {type_byte:#04x}")))?;
        let view_number = reader.read_u8()?;

        let message = match message_type {
            MessageType::ChangeView => ConsensusMessage::ChangeView(ChangeView {
                // The target view is implicit.
                new_view_number: view_number.wrapping_add(1),
                timestamp: reader.read_u32()?,
            }),
            MessageType::PrepareRequest => ConsensusMessage::PrepareRequest(
                read_prepare_request(&mut reader, state_root_enabled)?,
            ),
            MessageType::PrepareResponse => ConsensusMessage::PrepareResponse(PrepareResponse {
                preparation_hash: reader.read_serializable()?,
                state_root_sig: if state_root_enabled {
                    Some(reader.read_array::<SIGNATURE_SIZE>()?)
                } else {
                    None
                },
            }),
            MessageType::Commit => ConsensusMessage::Commit(Commit {
                signature: reader.read_array::<SIGNATURE_SIZE>()?,
            }),
            MessageType::RecoveryRequest => ConsensusMessage::RecoveryRequest(RecoveryRequest {
                timestamp: reader.read_u32()?,
            }),
            MessageType::RecoveryMessage => {
                let change_views = reader.read_serializable_list(MAX_COMPACTS)?;
                let prepare_request = if reader.read_bool()? {
                    Some(read_prepare_request(&mut reader, state_root_enabled)?)
                } else {
                    None
                };
                let preparation_hash = if prepare_request.is_none() && reader.read_bool()? {
                    Some(reader.read_serializable()?)
                } else {
                    None
                };
                ConsensusMessage::RecoveryMessage(RecoveryMessage {
                    change_views,
                    prepare_request,
                    preparation_hash,
                    preparations: reader.read_serializable_list(MAX_COMPACTS)?,
                    commits: reader.read_serializable_list(MAX_COMPACTS)?,
                })
            }
        };

        if !reader.is_exhausted() {
            return Err(IoError::decoding("consensus message", "trailing bytes"));
        }
        Ok((message, view_number))
    }
}

fn write_prepare_request(writer: &mut BinaryWriter, req: &PrepareRequest, state_root: bool) {
    writer.write_u32(req.timestamp);
    writer.write_u64(req.nonce);
    writer.write_serializable(&req.next_consensus);
    writer.write_serializable_list(&req.transaction_hashes);
    writer.write_serializable(&req.miner_tx);
    if state_root {
        writer.write_bytes(&req.state_root_sig.unwrap_or([0u8; SIGNATURE_SIZE]));
    }
}

fn read_prepare_request(
    reader: &mut MemoryReader,
    state_root: bool,
) -> neo2_io::Result<PrepareRequest> {
    Ok(PrepareRequest {
        timestamp: reader.read_u32()?,
        nonce: reader.read_u64()?,
        next_consensus: reader.read_serializable()?,
        transaction_hashes: reader.read_serializable_list(MAX_TX_HASHES)?,
        miner_tx: reader.read_serializable()?,
        state_root_sig: if state_root {
            Some(reader.read_array::<SIGNATURE_SIZE>()?)
        } else {
            None
        },
    })
}
