//! 프로토콜 봉투 정의
//!
//! 채널이 텍스트 지향 메시지 전송이므로 모든 봉투는 JSON 한 건으로
//! 직렬화된다. 청크 페이로드는 base64로 감싸 바이트를 그대로 보존한다.
//!
//! 와이어 형태: `{"type": "metadata"|"chunk"|"sync"|"control", ...}`

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkIndex;
use crate::error::{Error, Result};

/// 파일 메타데이터 (전송 선언)
///
/// 세션당 정확히 한 번, 모든 청크보다 먼저 보낸다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// 파일 이름
    pub file_name: String,

    /// 파일 크기 (바이트)
    pub file_size: u64,

    /// MIME 타입
    pub file_type: String,

    /// 총 청크 수
    pub total_chunks: u32,
}

/// 재생 클록 샘플 (마스터 → 팔로워)
///
/// 마스터만 생성하고 팔로워만 소비한다. 휘발성, 저장하지 않음.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSample {
    /// 마스터 로컬 재생 위치 (초)
    pub current_time: f64,

    /// 일시정지 여부
    pub paused: bool,

    /// 방출 시각 (epoch 밀리초)
    pub timestamp: u64,
}

/// 통합 봉투 enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// 전송 선언
    Metadata { metadata: FileMetadata },

    /// 파일 청크 (base64 페이로드 + CRC32)
    #[serde(rename_all = "camelCase")]
    Chunk {
        chunk_index: ChunkIndex,
        crc32: u32,
        data: String,
    },

    /// 재생 동기화 샘플
    #[serde(rename_all = "camelCase")]
    Sync { sync_data: SyncSample },

    /// 예약된 제어 명령 (free-form, 기본 no-op)
    Control { control: String },
}

impl Envelope {
    /// 메타데이터 봉투 생성
    pub fn metadata(meta: FileMetadata) -> Self {
        Envelope::Metadata { metadata: meta }
    }

    /// 청크 봉투 생성 (base64 인코딩 + CRC 계산)
    pub fn chunk(chunk_index: ChunkIndex, payload: &[u8]) -> Self {
        Envelope::Chunk {
            chunk_index,
            crc32: crc32fast::hash(payload),
            data: BASE64.encode(payload),
        }
    }

    /// 동기화 봉투 생성
    pub fn sync(sample: SyncSample) -> Self {
        Envelope::Sync { sync_data: sample }
    }

    /// JSON 텍스트로 직렬화
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// JSON 텍스트에서 역직렬화
    ///
    /// - 파싱 불가 / `type` 없음 / 알 수 없는 태그: `MalformedEnvelope`
    /// - metadata/chunk의 필수 필드 누락: `ProtocolViolation`
    /// - sync/control의 필드 문제: `MalformedEnvelope`
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::MalformedEnvelope("type 필드 없음".into()))?
            .to_string();

        match tag.as_str() {
            // 필수 봉투: 필드 누락은 프로토콜 위반으로 구분해서 보고
            "metadata" | "chunk" => serde_json::from_value(value)
                .map_err(|e| Error::ProtocolViolation(format!("{tag} 필수 필드 누락: {e}"))),
            "sync" | "control" => {
                serde_json::from_value(value).map_err(|e| Error::MalformedEnvelope(e.to_string()))
            }
            other => Err(Error::MalformedEnvelope(format!("알 수 없는 태그: {other}"))),
        }
    }

    /// 청크 페이로드 복원 (base64 디코드 + CRC 검증)
    pub fn chunk_payload(&self) -> Result<(ChunkIndex, Bytes)> {
        match self {
            Envelope::Chunk {
                chunk_index,
                crc32,
                data,
            } => {
                let raw = BASE64
                    .decode(data)
                    .map_err(|e| Error::MalformedEnvelope(format!("base64 디코드 실패: {e}")))?;
                let got = crc32fast::hash(&raw);
                if got != *crc32 {
                    return Err(Error::CrcMismatch {
                        expected: *crc32,
                        got,
                    });
                }
                Ok((*chunk_index, Bytes::from(raw)))
            }
            _ => Err(Error::ProtocolViolation("청크 봉투 아님".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_roundtrip() {
        let env = Envelope::metadata(FileMetadata {
            file_name: "movie.mp4".into(),
            file_size: 1024 * 1024,
            file_type: "video/mp4".into(),
            total_chunks: 64,
        });

        let text = env.encode();
        assert!(text.contains("\"type\":\"metadata\""));
        assert!(text.contains("\"fileName\":\"movie.mp4\""));

        let restored = Envelope::decode(&text).unwrap();
        match restored {
            Envelope::Metadata { metadata } => {
                assert_eq!(metadata.file_size, 1024 * 1024);
                assert_eq!(metadata.total_chunks, 64);
            }
            _ => panic!("expected metadata envelope"),
        }
    }

    #[test]
    fn test_chunk_roundtrip_preserves_bytes() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let env = Envelope::chunk(7, &payload);

        let restored = Envelope::decode(&env.encode()).unwrap();
        let (index, bytes) = restored.chunk_payload().unwrap();

        assert_eq!(index, 7);
        assert_eq!(bytes.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_sync_roundtrip() {
        let env = Envelope::sync(SyncSample {
            current_time: 123.45,
            paused: false,
            timestamp: 1_700_000_000_000,
        });

        let restored = Envelope::decode(&env.encode()).unwrap();
        match restored {
            Envelope::Sync { sync_data } => {
                assert_eq!(sync_data.current_time, 123.45);
                assert!(!sync_data.paused);
            }
            _ => panic!("expected sync envelope"),
        }
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            Envelope::decode("not json at all"),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::decode("{\"no_type\": 1}"),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_unknown_tag_is_malformed() {
        assert!(matches!(
            Envelope::decode("{\"type\":\"teleport\"}"),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_chunk_missing_field_is_protocol_violation() {
        // data 필드 누락
        let text = "{\"type\":\"chunk\",\"chunkIndex\":3,\"crc32\":0}";
        assert!(matches!(
            Envelope::decode(text),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_metadata_missing_field_is_protocol_violation() {
        let text = "{\"type\":\"metadata\",\"metadata\":{\"fileName\":\"a\"}}";
        assert!(matches!(
            Envelope::decode(text),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_chunk_crc_mismatch() {
        // 페이로드를 다른 내용으로 바꿔치기하면 CRC 검증에 걸린다
        let tampered = match Envelope::chunk(0, b"hello") {
            Envelope::Chunk {
                chunk_index, crc32, ..
            } => Envelope::Chunk {
                chunk_index,
                crc32,
                data: BASE64.encode(b"jello"),
            },
            _ => unreachable!(),
        };

        assert!(matches!(
            tampered.chunk_payload(),
            Err(Error::CrcMismatch { .. })
        ));
    }
}
