//! Wire message types: the common header and every registered body shape.
//!
//! Bodies form a closed sum type keyed by the header's `msg_name`. Names
//! without a registered shape decode to [`Body::Unknown`] so a frame from a
//! newer peer stays structurally valid instead of silently decoding to
//! nothing.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::encoding::{
    BinaryReader, BinaryWriter, T_BYTE, T_I32, T_I64, T_LIST, T_MAP, T_STRING, T_STRUCT,
};
use crate::ProtocolError;

pub const VER_REQ: &str = "ver_req";
pub const VER_RESP: &str = "ver_resp";
pub const SHAKE_HAND_REQ: &str = "shake_hand_req";
pub const SHAKE_HAND_RESP: &str = "shake_hand_resp";
pub const GET_PEER_NODES_REQ: &str = "get_peer_nodes_req";
pub const GET_PEER_NODES_RESP: &str = "get_peer_nodes_resp";
pub const START_TRAINING_REQ: &str = "start_training_req";
pub const STOP_TRAINING_REQ: &str = "stop_training_req";
pub const LIST_TRAINING_REQ: &str = "list_training_req";
pub const LIST_TRAINING_RESP: &str = "list_training_resp";

/// Node-local topic published when an outbound connect succeeds or fails.
/// Never serialized to the wire.
pub const CLIENT_CONNECT_NOTIFICATION: &str = "client_connect_notification";

/// Common message header.
///
/// `nonce`, `session_id` and `exten_info` are optional on the wire: empty
/// values are omitted on encode and default on decode. Unknown fields from
/// newer peers are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub magic: i32,
    pub msg_name: String,
    pub nonce: String,
    pub session_id: String,
    pub exten_info: BTreeMap<String, String>,
}

impl MsgHeader {
    pub fn new(magic: i32, msg_name: impl Into<String>) -> Self {
        Self {
            magic,
            msg_name: msg_name.into(),
            ..Default::default()
        }
    }

    pub fn write(&self, w: &mut BinaryWriter) {
        w.i32_field(1, self.magic);
        w.string_field(2, &self.msg_name);
        if !self.nonce.is_empty() {
            w.string_field(3, &self.nonce);
        }
        if !self.session_id.is_empty() {
            w.string_field(4, &self.session_id);
        }
        if !self.exten_info.is_empty() {
            w.field_begin(T_MAP, 255);
            w.map_begin(T_STRING, T_STRING, self.exten_info.len());
            for (k, v) in &self.exten_info {
                w.write_string(k);
                w.write_string(v);
            }
        }
        w.stop();
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut header = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_I32) => header.magic = r.read_i32()?,
                (2, T_STRING) => header.msg_name = r.read_string()?,
                (3, T_STRING) => header.nonce = r.read_string()?,
                (4, T_STRING) => header.session_id = r.read_string()?,
                (255, T_MAP) => {
                    let (key_type, val_type, len) = r.read_map_begin()?;
                    if key_type != T_STRING || val_type != T_STRING {
                        return Err(ProtocolError::MessageDecodeError(
                            "exten_info must be a string map".into(),
                        ));
                    }
                    for _ in 0..len {
                        let k = r.read_string()?;
                        let v = r.read_string()?;
                        header.exten_info.insert(k, v);
                    }
                }
                _ => r.skip(ttype)?,
            }
        }
        if header.msg_name.is_empty() {
            return Err(ProtocolError::MessageDecodeError(
                "header missing msg_name".into(),
            ));
        }
        Ok(header)
    }
}

/// host/port pair carried inside version handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetAddress {
    pub ip: String,
    pub port: i16,
}

impl NetAddress {
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port() as i16,
        }
    }

    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.ip);
        w.field_begin(crate::encoding::T_I16, 2);
        w.write_i16(self.port);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut addr = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => addr.ip = r.read_string()?,
                (2, crate::encoding::T_I16) => addr.port = r.read_i16()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(addr)
    }
}

/// Version handshake request, the first message on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerReq {
    pub node_id: String,
    pub core_version: i32,
    pub protocol_version: i32,
    pub time_stamp: i64,
    pub addr_me: NetAddress,
    pub addr_you: NetAddress,
    pub start_height: i64,
}

impl VerReq {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.node_id);
        w.i32_field(2, self.core_version);
        w.i32_field(3, self.protocol_version);
        w.i64_field(4, self.time_stamp);
        w.field_begin(T_STRUCT, 5);
        self.addr_me.write(w);
        w.field_begin(T_STRUCT, 6);
        self.addr_you.write(w);
        w.i64_field(7, self.start_height);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => body.node_id = r.read_string()?,
                (2, T_I32) => body.core_version = r.read_i32()?,
                (3, T_I32) => body.protocol_version = r.read_i32()?,
                (4, T_I64) => body.time_stamp = r.read_i64()?,
                (5, T_STRUCT) => body.addr_me = NetAddress::read(r)?,
                (6, T_STRUCT) => body.addr_you = NetAddress::read(r)?,
                (7, T_I64) => body.start_height = r.read_i64()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

/// Version handshake response. Receiving one confirms the peer is live and
/// promotes its candidate to active.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerResp {
    pub node_id: String,
    pub core_version: i32,
    pub protocol_version: i32,
}

impl VerResp {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.node_id);
        w.i32_field(2, self.core_version);
        w.i32_field(3, self.protocol_version);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => body.node_id = r.read_string()?,
                (2, T_I32) => body.core_version = r.read_i32()?,
                (3, T_I32) => body.protocol_version = r.read_i32()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

/// One advertised peer inside a peer-exchange response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerNodeInfo {
    pub peer_node_id: String,
    pub core_version: i32,
    pub protocol_version: i32,
    pub live_time_stamp: i64,
    pub addr: NetAddress,
}

impl PeerNodeInfo {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.peer_node_id);
        w.i32_field(2, self.core_version);
        w.i32_field(3, self.protocol_version);
        w.i64_field(4, self.live_time_stamp);
        w.field_begin(T_STRUCT, 5);
        self.addr.write(w);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut info = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => info.peer_node_id = r.read_string()?,
                (2, T_I32) => info.core_version = r.read_i32()?,
                (3, T_I32) => info.protocol_version = r.read_i32()?,
                (4, T_I64) => info.live_time_stamp = r.read_i64()?,
                (5, T_STRUCT) => info.addr = NetAddress::read(r)?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(info)
    }
}

/// Peer-exchange response: the sender's view of dialable peers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetPeerNodesResp {
    pub peers: Vec<PeerNodeInfo>,
}

impl GetPeerNodesResp {
    fn write(&self, w: &mut BinaryWriter) {
        w.field_begin(T_LIST, 1);
        w.list_begin(T_STRUCT, self.peers.len());
        for peer in &self.peers {
            peer.write(w);
        }
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_LIST) => {
                    let (elem_type, len) = r.read_list_begin()?;
                    if elem_type != T_STRUCT {
                        return Err(ProtocolError::MessageDecodeError(
                            "peer list must contain structs".into(),
                        ));
                    }
                    for _ in 0..len {
                        body.peers.push(PeerNodeInfo::read(r)?);
                    }
                }
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

/// Authenticated request to start a training task on remote mining nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartTrainingReq {
    pub task_id: String,
    pub select_mode: i8,
    pub master: String,
    pub peer_nodes: Vec<String>,
    pub server_specification: String,
    pub server_count: i32,
    pub training_engine: String,
    pub code_dir: String,
    pub entry_file: String,
    pub data_dir: String,
    pub checkpoint_dir: String,
    pub hyper_parameters: String,
}

impl StartTrainingReq {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.task_id);
        w.field_begin(T_BYTE, 2);
        w.write_byte(self.select_mode);
        w.string_field(3, &self.master);
        w.field_begin(T_LIST, 4);
        w.list_begin(T_STRING, self.peer_nodes.len());
        for node in &self.peer_nodes {
            w.write_string(node);
        }
        w.string_field(5, &self.server_specification);
        w.i32_field(6, self.server_count);
        w.string_field(7, &self.training_engine);
        w.string_field(8, &self.code_dir);
        w.string_field(9, &self.entry_file);
        w.string_field(10, &self.data_dir);
        w.string_field(11, &self.checkpoint_dir);
        w.string_field(12, &self.hyper_parameters);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => body.task_id = r.read_string()?,
                (2, T_BYTE) => body.select_mode = r.read_byte()?,
                (3, T_STRING) => body.master = r.read_string()?,
                (4, T_LIST) => {
                    let (elem_type, len) = r.read_list_begin()?;
                    if elem_type != T_STRING {
                        return Err(ProtocolError::MessageDecodeError(
                            "peer_nodes must be a string list".into(),
                        ));
                    }
                    for _ in 0..len {
                        body.peer_nodes.push(r.read_string()?);
                    }
                }
                (5, T_STRING) => body.server_specification = r.read_string()?,
                (6, T_I32) => body.server_count = r.read_i32()?,
                (7, T_STRING) => body.training_engine = r.read_string()?,
                (8, T_STRING) => body.code_dir = r.read_string()?,
                (9, T_STRING) => body.entry_file = r.read_string()?,
                (10, T_STRING) => body.data_dir = r.read_string()?,
                (11, T_STRING) => body.checkpoint_dir = r.read_string()?,
                (12, T_STRING) => body.hyper_parameters = r.read_string()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

/// Authenticated request to stop a running training task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopTrainingReq {
    pub task_id: String,
}

impl StopTrainingReq {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.task_id);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => body.task_id = r.read_string()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListTrainingReq {
    pub task_ids: Vec<String>,
}

impl ListTrainingReq {
    fn write(&self, w: &mut BinaryWriter) {
        w.field_begin(T_LIST, 1);
        w.list_begin(T_STRING, self.task_ids.len());
        for id in &self.task_ids {
            w.write_string(id);
        }
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_LIST) => {
                    let (elem_type, len) = r.read_list_begin()?;
                    if elem_type != T_STRING {
                        return Err(ProtocolError::MessageDecodeError(
                            "task_ids must be a string list".into(),
                        ));
                    }
                    for _ in 0..len {
                        body.task_ids.push(r.read_string()?);
                    }
                }
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: i8,
}

impl TaskStatus {
    fn write(&self, w: &mut BinaryWriter) {
        w.string_field(1, &self.task_id);
        w.field_begin(T_BYTE, 2);
        w.write_byte(self.status);
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut status = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_STRING) => status.task_id = r.read_string()?,
                (2, T_BYTE) => status.status = r.read_byte()?,
                _ => r.skip(ttype)?,
            }
        }
        Ok(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListTrainingResp {
    pub task_status: Vec<TaskStatus>,
}

impl ListTrainingResp {
    fn write(&self, w: &mut BinaryWriter) {
        w.field_begin(T_LIST, 1);
        w.list_begin(T_STRUCT, self.task_status.len());
        for status in &self.task_status {
            status.write(w);
        }
        w.stop();
    }

    fn read(r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let mut body = Self::default();
        while let Some((ttype, id)) = r.read_field_begin()? {
            match (id, ttype) {
                (1, T_LIST) => {
                    let (elem_type, len) = r.read_list_begin()?;
                    if elem_type != T_STRUCT {
                        return Err(ProtocolError::MessageDecodeError(
                            "task_status must be a struct list".into(),
                        ));
                    }
                    for _ in 0..len {
                        body.task_status.push(TaskStatus::read(r)?);
                    }
                }
                _ => r.skip(ttype)?,
            }
        }
        Ok(body)
    }
}

/// Node-local connect outcome notification. `status` is 0 on success,
/// -1 on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectNotification {
    pub endpoint: SocketAddr,
    pub status: i32,
}

/// Every message body this node understands, plus `Unknown` for names
/// without a registered shape and `Empty` for messages that carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    VerReq(VerReq),
    VerResp(VerResp),
    ShakeHandReq,
    ShakeHandResp,
    GetPeerNodesReq,
    GetPeerNodesResp(GetPeerNodesResp),
    StartTrainingReq(StartTrainingReq),
    StopTrainingReq(StopTrainingReq),
    ListTrainingReq(ListTrainingReq),
    ListTrainingResp(ListTrainingResp),
    /// Node-local, never wire-encoded.
    ConnectNotification(ConnectNotification),
    Empty,
    Unknown(Bytes),
}

/// Reads a body that carries no fields. Any fields present are skipped so a
/// newer peer can extend these messages without breaking us.
fn read_empty_struct(r: &mut BinaryReader<'_>) -> Result<(), ProtocolError> {
    while let Some((ttype, _)) = r.read_field_begin()? {
        r.skip(ttype)?;
    }
    Ok(())
}

impl Body {
    pub fn write(&self, w: &mut BinaryWriter) -> Result<(), ProtocolError> {
        match self {
            Body::VerReq(b) => b.write(w),
            Body::VerResp(b) => b.write(w),
            Body::GetPeerNodesResp(b) => b.write(w),
            Body::StartTrainingReq(b) => b.write(w),
            Body::StopTrainingReq(b) => b.write(w),
            Body::ListTrainingReq(b) => b.write(w),
            Body::ListTrainingResp(b) => b.write(w),
            Body::ShakeHandReq | Body::ShakeHandResp | Body::GetPeerNodesReq | Body::Empty => {
                w.stop();
            }
            Body::Unknown(_) => {
                return Err(ProtocolError::MessageDecodeError(
                    "unknown body cannot be re-encoded".into(),
                ));
            }
            Body::ConnectNotification(_) => {
                return Err(ProtocolError::NotWireMessage(CLIENT_CONNECT_NOTIFICATION));
            }
        }
        Ok(())
    }

    /// Decode the body for `msg_name`. Unregistered names capture the
    /// remaining bytes verbatim.
    pub fn read(msg_name: &str, r: &mut BinaryReader<'_>) -> Result<Self, ProtocolError> {
        let body = match msg_name {
            VER_REQ => Body::VerReq(VerReq::read(r)?),
            VER_RESP => Body::VerResp(VerResp::read(r)?),
            SHAKE_HAND_REQ => {
                read_empty_struct(r)?;
                Body::ShakeHandReq
            }
            SHAKE_HAND_RESP => {
                read_empty_struct(r)?;
                Body::ShakeHandResp
            }
            GET_PEER_NODES_REQ => {
                read_empty_struct(r)?;
                Body::GetPeerNodesReq
            }
            GET_PEER_NODES_RESP => Body::GetPeerNodesResp(GetPeerNodesResp::read(r)?),
            START_TRAINING_REQ => Body::StartTrainingReq(StartTrainingReq::read(r)?),
            STOP_TRAINING_REQ => Body::StopTrainingReq(StopTrainingReq::read(r)?),
            LIST_TRAINING_REQ => Body::ListTrainingReq(ListTrainingReq::read(r)?),
            LIST_TRAINING_RESP => Body::ListTrainingResp(ListTrainingResp::read(r)?),
            _ => Body::Unknown(Bytes::copy_from_slice(r.remaining())),
        };
        Ok(body)
    }
}

/// Version handshake request with our view of both endpoints.
pub fn build_ver_req(
    magic: i32,
    node_id: &str,
    addr_me: NetAddress,
    addr_you: NetAddress,
    time_stamp: i64,
) -> (MsgHeader, Body) {
    (
        MsgHeader::new(magic, VER_REQ),
        Body::VerReq(VerReq {
            node_id: node_id.to_string(),
            core_version: crate::CORE_VERSION,
            protocol_version: crate::PROTOCOL_VERSION,
            time_stamp,
            addr_me,
            addr_you,
            start_height: 1,
        }),
    )
}

pub fn build_ver_resp(magic: i32, node_id: &str) -> (MsgHeader, Body) {
    (
        MsgHeader::new(magic, VER_RESP),
        Body::VerResp(VerResp {
            node_id: node_id.to_string(),
            core_version: crate::CORE_VERSION,
            protocol_version: crate::PROTOCOL_VERSION,
        }),
    )
}

pub fn build_shake_hand_req(magic: i32) -> (MsgHeader, Body) {
    (MsgHeader::new(magic, SHAKE_HAND_REQ), Body::ShakeHandReq)
}

pub fn build_shake_hand_resp(magic: i32) -> (MsgHeader, Body) {
    (MsgHeader::new(magic, SHAKE_HAND_RESP), Body::ShakeHandResp)
}

pub fn build_get_peer_nodes_req(magic: i32) -> (MsgHeader, Body) {
    (
        MsgHeader::new(magic, GET_PEER_NODES_REQ),
        Body::GetPeerNodesReq,
    )
}

pub fn build_get_peer_nodes_resp(magic: i32, peers: Vec<PeerNodeInfo>) -> (MsgHeader, Body) {
    (
        MsgHeader::new(magic, GET_PEER_NODES_RESP),
        Body::GetPeerNodesResp(GetPeerNodesResp { peers }),
    )
}
