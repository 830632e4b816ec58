//! Server event builders and client event helpers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use rtvoice::core::realtime::openai::{ClientEvent, ServerEvent};

use super::audio_fixtures::{bytes_to_samples, samples_to_bytes};

pub fn server_event(value: Value) -> ServerEvent {
    serde_json::from_value(value).expect("fixture is a valid server event")
}

/// `session.created`; `vad` selects server VAD, otherwise turn detection is off.
pub fn session_created(session_id: &str, vad: bool) -> Value {
    let turn_detection = if vad {
        json!({"type": "server_vad", "threshold": 0.5})
    } else {
        Value::Null
    };
    json!({
        "type": "session.created",
        "session": {
            "id": session_id,
            "model": "gpt-4o-realtime-preview",
            "turn_detection": turn_detection
        }
    })
}

pub fn audio_delta(item_id: &str, samples: &[i16]) -> Value {
    json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": item_id,
        "output_index": 0,
        "content_index": 0,
        "delta": STANDARD.encode(samples_to_bytes(samples))
    })
}

pub fn transcript_delta(item_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.audio_transcript.delta",
        "item_id": item_id,
        "delta": delta
    })
}

pub fn transcript_done(item_id: &str, transcript: &str) -> Value {
    json!({
        "type": "response.audio_transcript.done",
        "item_id": item_id,
        "transcript": transcript
    })
}

pub fn speech_started(item_id: &str) -> Value {
    json!({
        "type": "input_audio_buffer.speech_started",
        "audio_start_ms": 120,
        "item_id": item_id
    })
}

/// A function-call output item.
pub fn function_call(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "type": "function_call",
        "id": format!("item_{call_id}"),
        "status": "completed",
        "call_id": call_id,
        "name": name,
        "arguments": arguments
    })
}

pub fn response_done(response_id: &str, output: Vec<Value>) -> Value {
    json!({
        "type": "response.done",
        "response": {
            "id": response_id,
            "status": "completed",
            "output": output
        }
    })
}

/// Samples carried by an `input_audio_buffer.append`.
pub fn appended_samples(event: &ClientEvent) -> Option<Vec<i16>> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio } => STANDARD
            .decode(audio)
            .ok()
            .map(|bytes| bytes_to_samples(&bytes)),
        _ => None,
    }
}

/// `(call_id, output)` of a function-call-output item creation.
pub fn submitted_tool_result(event: &ClientEvent) -> Option<(String, String)> {
    match event {
        ClientEvent::ConversationItemCreate { item } if item.item_type == "function_call_output" => {
            Some((item.call_id.clone()?, item.output.clone()?))
        }
        _ => None,
    }
}

/// Wire type names of `events`, in order.
pub fn event_types(events: &[ClientEvent]) -> Vec<&'static str> {
    events.iter().map(ClientEvent::event_type).collect()
}
