//! Builders for outbound control requests that require sender
//! authentication.
//!
//! Start/stop training requests carry a signature over their identifying
//! fields in the header's extension map; the receiving service verifies it
//! against the origin node's key. Managers send the returned bytes through
//! `ConnectionManager::broadcast` or `send_to`.

use bytes::Bytes;
use neuromesh_crypto::{random_id, RequestSigner};
use neuromesh_protocol::{
    Body, MsgHeader, ProtocolError, StartTrainingReq, StopTrainingReq, WireCodec,
    START_TRAINING_REQ, STOP_TRAINING_REQ,
};

/// Parameters for a start-training request. Directory fields are content
/// addresses, opaque to the network core.
#[derive(Debug, Clone, Default)]
pub struct TrainingParams {
    pub peer_nodes: Vec<String>,
    pub training_engine: String,
    pub code_dir: String,
    pub entry_file: String,
    pub data_dir: String,
    pub hyper_parameters: String,
    pub server_count: i32,
}

/// Build a signed start-training request. Returns the generated task id and
/// the encoded frame. The signature covers task id, code dir and nonce, in
/// that order.
pub fn build_start_training(
    signer: &RequestSigner,
    magic: i32,
    params: TrainingParams,
) -> Result<(String, Bytes), ProtocolError> {
    let task_id = random_id();
    let nonce = random_id();

    let signature = signer.sign_request(&[&task_id, &params.code_dir, &nonce]);

    let mut header = MsgHeader::new(magic, START_TRAINING_REQ);
    header.nonce = nonce;
    header.exten_info = signature.to_exten_info();

    let body = Body::StartTrainingReq(StartTrainingReq {
        task_id: task_id.clone(),
        select_mode: 0,
        master: String::new(),
        peer_nodes: params.peer_nodes,
        server_specification: String::new(),
        server_count: params.server_count,
        training_engine: params.training_engine,
        code_dir: params.code_dir,
        entry_file: params.entry_file,
        data_dir: params.data_dir,
        checkpoint_dir: String::new(),
        hyper_parameters: params.hyper_parameters,
    });

    let bytes = WireCodec::encode(&header, &body)?;
    Ok((task_id, bytes))
}

/// Build a signed stop-training request for a running task. The signature
/// covers task id and nonce.
pub fn build_stop_training(
    signer: &RequestSigner,
    magic: i32,
    task_id: &str,
) -> Result<Bytes, ProtocolError> {
    let nonce = random_id();
    let signature = signer.sign_request(&[task_id, &nonce]);

    let mut header = MsgHeader::new(magic, STOP_TRAINING_REQ);
    header.nonce = nonce;
    header.exten_info = signature.to_exten_info();

    let body = Body::StopTrainingReq(StopTrainingReq {
        task_id: task_id.to_string(),
    });
    WireCodec::encode(&header, &body)
}
