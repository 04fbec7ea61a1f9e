//! Bridge to an out-of-process face encoder.
//!
//! The encoder is any program that speaks a line protocol on stdio. Per
//! request it receives a JSON header line `{"width":W,"height":H}` followed
//! by exactly `W*H` grayscale bytes, and answers with one JSON line: an
//! array of `{"bbox":{..},"embedding":{"values":[..]}}` objects.

use punchcard_core::recognition::{EncodedFace, FaceEncoder, RecognitionError};
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

#[derive(Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Spawns the encoder lazily and respawns it after a protocol failure.
pub struct ExternalEncoder {
    command: String,
    worker: Option<Worker>,
}

impl ExternalEncoder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            worker: None,
        }
    }

    fn spawn(&self) -> Result<Worker, RecognitionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RecognitionError::Encoder(format!("spawn {:?}: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::Encoder("encoder stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecognitionError::Encoder("encoder stdout unavailable".into()))?;

        tracing::info!(command = %self.command, pid = child.id(), "face encoder started");
        Ok(Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.child.kill();
            let _ = worker.child.wait();
        }
    }
}

fn round_trip(worker: &mut Worker, frame: &[u8], width: u32, height: u32)
    -> Result<Vec<EncodedFace>, RecognitionError> {
    let io = |e: std::io::Error| RecognitionError::Encoder(format!("encoder pipe: {e}"));

    let header = serde_json::to_string(&FrameHeader { width, height })
        .map_err(|e| RecognitionError::Encoder(e.to_string()))?;
    writeln!(worker.stdin, "{header}").map_err(io)?;
    worker.stdin.write_all(frame).map_err(io)?;
    worker.stdin.flush().map_err(io)?;

    let mut line = String::new();
    if worker.stdout.read_line(&mut line).map_err(io)? == 0 {
        return Err(RecognitionError::Encoder("encoder closed its output".into()));
    }
    parse_reply(&line)
}

/// Decode one reply line. Every face must carry a non-empty embedding,
/// all of the same length.
pub fn parse_reply(line: &str) -> Result<Vec<EncodedFace>, RecognitionError> {
    let faces: Vec<EncodedFace> = serde_json::from_str(line.trim())
        .map_err(|e| RecognitionError::Encoder(format!("bad encoder reply: {e}")))?;

    if let Some(first) = faces.first() {
        let dimension = first.embedding.dimension();
        if dimension == 0 {
            return Err(RecognitionError::Encoder("bad encoder reply: empty embedding".into()));
        }
        if let Some(face) = faces.iter().find(|f| f.embedding.dimension() != dimension) {
            return Err(RecognitionError::Encoder(format!(
                "bad encoder reply: embedding length {} differs from {dimension}",
                face.embedding.dimension()
            )));
        }
    }
    Ok(faces)
}

impl FaceEncoder for ExternalEncoder {
    fn encode_faces(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<EncodedFace>, RecognitionError> {
        let expected = (width as usize) * (height as usize);
        if frame.len() != expected {
            return Err(RecognitionError::BadFrame {
                expected,
                actual: frame.len(),
            });
        }

        if self.worker.is_none() {
            self.worker = Some(self.spawn()?);
        }
        let Some(worker) = self.worker.as_mut() else {
            return Err(RecognitionError::Encoder("encoder not running".into()));
        };

        let result = round_trip(worker, frame, width, height);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "face encoder failed; restarting on next frame");
            self.shutdown();
        }
        result
    }
}

impl Drop for ExternalEncoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let faces = parse_reply(
            r#"[{"bbox":{"x":1,"y":2,"width":30,"height":40,"confidence":0.8},"embedding":{"values":[0.1,0.2]}}]"#,
        )
        .unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.width, 30.0);
        assert_eq!(faces[0].embedding.values, vec![0.1, 0.2]);
    }

    #[test]
    fn test_parse_reply_empty_and_invalid() {
        assert!(parse_reply("[]\n").unwrap().is_empty());
        assert!(matches!(parse_reply("oops"), Err(RecognitionError::Encoder(_))));
    }

    #[test]
    fn test_parse_reply_rejects_bad_embeddings() {
        let empty = r#"[{"bbox":{"x":0,"y":0,"width":2,"height":2},"embedding":{"values":[]}}]"#;
        assert!(matches!(parse_reply(empty), Err(RecognitionError::Encoder(_))));

        let ragged = r#"[{"bbox":{"x":0,"y":0,"width":2,"height":2},"embedding":{"values":[0.1,0.2]}},
                         {"bbox":{"x":4,"y":0,"width":2,"height":2},"embedding":{"values":[0.1]}}]"#;
        assert!(matches!(parse_reply(ragged), Err(RecognitionError::Encoder(_))));
    }

    #[test]
    fn test_frame_size_checked_before_spawn() {
        let mut encoder = ExternalEncoder::new("false");
        assert!(matches!(
            encoder.encode_faces(&[0u8; 3], 2, 2),
            Err(RecognitionError::BadFrame { expected: 4, actual: 3 })
        ));
        assert!(encoder.worker.is_none());
    }

    #[test]
    fn test_round_trip_with_shell_encoder() {
        // Answers with one fixed face, then drains stdin.
        let script = r#"echo '[{"bbox":{"x":0,"y":0,"width":2,"height":2},"embedding":{"values":[1.0]}}]'; cat >/dev/null"#;
        let mut encoder = ExternalEncoder::new(script);
        let faces = encoder.encode_faces(&[9u8; 4], 2, 2).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.confidence, 1.0);
    }

    #[test]
    fn test_dead_encoder_reports_error() {
        let mut encoder = ExternalEncoder::new("exit 0");
        assert!(encoder.encode_faces(&[0u8; 4], 2, 2).is_err());
        assert!(encoder.worker.is_none());
    }
}
