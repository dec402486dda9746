//! 参考图片暂存区
//!
//! 为下一轮提交暂存最多 max_count 张参考图片（默认 3 张，每张不超过 4 MiB）。来源有三种：文件选择、
//! 剪贴板粘贴、复用已生成的图片；第三种会从 data URL 重新解码出二进制，与上传文件无差别。
//! 提交时 drain_for_submission 取走全部并清空。每次成功添加都会广播 AttachmentEvent，供 UI 短暂提示。

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::AttachmentsSection;
use crate::core::ValidationError;

const DEFAULT_MIME: &str = "application/octet-stream";

/// 图片来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    FilePicker,
    Clipboard,
    GeneratedImage,
}

/// 待暂存的原始文件
#[derive(Clone, Debug)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// 已暂存的参考图片：二进制负载 + 用于展示的 data URL
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub name: String,
    pub mime_type: String,
    pub payload: Vec<u8>,
    pub display_url: String,
    pub source: AttachmentSource,
}

impl ReferenceImage {
    /// 网关边界的内联片段 (mime_type, base64)，由 data URL 在第一个逗号处切分得到
    pub fn inline_part(&self) -> (String, String) {
        match split_data_url(&self.display_url) {
            Ok(parts) => parts,
            Err(_) => (self.mime_type.clone(), STANDARD.encode(&self.payload)),
        }
    }
}

/// 暂存区变化通知
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachmentEvent {
    Added {
        index: usize,
        name: String,
        source: AttachmentSource,
    },
    Removed { index: usize },
    Cleared,
}

/// 将 data URL 在第一个逗号处切分为 (mime_type, base64)；头部缺少 MIME 时为 application/octet-stream
pub fn split_data_url(url: &str) -> Result<(String, String), ValidationError> {
    let (header, data) = url
        .split_once(',')
        .ok_or_else(|| ValidationError::InvalidDataUrl("missing ','".to_string()))?;
    if !header.starts_with("data:") {
        return Err(ValidationError::InvalidDataUrl(
            header.chars().take(32).collect(),
        ));
    }
    let mime = header
        .split_once(':')
        .and_then(|(_, rest)| rest.split_once(';'))
        .map(|(mime, _)| mime)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MIME);
    Ok((mime.to_string(), data.to_string()))
}

pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// 按扩展名推断图片 MIME；不是图片时返回 None
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// 参考图片暂存区
#[derive(Debug)]
pub struct AttachmentManager {
    staged: Vec<ReferenceImage>,
    max_count: usize,
    max_bytes: usize,
    events: broadcast::Sender<AttachmentEvent>,
}

impl AttachmentManager {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            staged: Vec::new(),
            max_count,
            max_bytes,
            events,
        }
    }

    pub fn from_config(section: &AttachmentsSection) -> Self {
        Self::new(section.max_count, section.max_bytes)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttachmentEvent> {
        self.events.subscribe()
    }

    pub fn staged(&self) -> &[ReferenceImage] {
        &self.staged
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.staged.len() >= self.max_count
    }

    /// 暂存一张图片：先检查数量上限，再检查大小与类型；返回其下标
    pub fn add(&mut self, file: ImageFile, source: AttachmentSource) -> Result<usize, ValidationError> {
        if self.is_full() {
            return Err(ValidationError::TooManyAttachments {
                max: self.max_count,
            });
        }
        if file.bytes.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                name: file.name,
                size: file.bytes.len(),
                max: self.max_bytes,
            });
        }
        if !file.mime_type.starts_with("image/") {
            return Err(ValidationError::UnsupportedMedia {
                name: file.name,
                mime: file.mime_type,
            });
        }

        let display_url = to_data_url(&file.mime_type, &file.bytes);
        let index = self.staged.len();
        tracing::debug!(name = %file.name, size = file.bytes.len(), ?source, "reference image staged");
        let _ = self.events.send(AttachmentEvent::Added {
            index,
            name: file.name.clone(),
            source,
        });
        self.staged.push(ReferenceImage {
            name: file.name,
            mime_type: file.mime_type,
            payload: file.bytes,
            display_url,
            source,
        });
        Ok(index)
    }

    /// 文件选择：异步读取磁盘文件
    pub async fn add_path(&mut self, path: &Path) -> Result<usize, ValidationError> {
        self.add_file_from(path, AttachmentSource::FilePicker).await
    }

    /// 剪贴板粘贴：内容为 data URL 时直接解码，否则视为图片文件路径
    pub async fn add_pasted(&mut self, pasted: &str) -> Result<usize, ValidationError> {
        let pasted = pasted.trim();
        if pasted.starts_with("data:") {
            let name = format!("pasted_{}", chrono::Local::now().timestamp_millis());
            return self.add_data_url(pasted, &name, AttachmentSource::Clipboard);
        }
        self.add_file_from(Path::new(pasted), AttachmentSource::Clipboard)
            .await
    }

    /// 复用已生成的图片作为参考：从 data URL 还原二进制，文件名 ref_luxore_<毫秒>.<扩展名>
    pub fn add_generated(&mut self, image_url: &str) -> Result<usize, ValidationError> {
        let (mime, _) = split_data_url(image_url)?;
        let ext = mime.split('/').nth(1).filter(|e| !e.is_empty()).unwrap_or("png");
        let name = format!(
            "ref_luxore_{}.{}",
            chrono::Local::now().timestamp_millis(),
            ext
        );
        self.add_data_url(image_url, &name, AttachmentSource::GeneratedImage)
    }

    fn add_data_url(
        &mut self,
        url: &str,
        name: &str,
        source: AttachmentSource,
    ) -> Result<usize, ValidationError> {
        if self.is_full() {
            return Err(ValidationError::TooManyAttachments {
                max: self.max_count,
            });
        }
        let (mime_type, data) = split_data_url(url)?;
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| ValidationError::InvalidDataUrl(e.to_string()))?;
        self.add(
            ImageFile {
                name: name.to_string(),
                mime_type,
                bytes,
            },
            source,
        )
    }

    async fn add_file_from(
        &mut self,
        path: &Path,
        source: AttachmentSource,
    ) -> Result<usize, ValidationError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if self.is_full() {
            return Err(ValidationError::TooManyAttachments {
                max: self.max_count,
            });
        }
        let mime_type = mime_for_path(path).ok_or_else(|| ValidationError::UnsupportedMedia {
            name: name.clone(),
            mime: DEFAULT_MIME.to_string(),
        })?;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ValidationError::Io {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        // 先看元数据，避免把超大文件整个读进内存
        if metadata.len() as usize > self.max_bytes {
            return Err(ValidationError::TooLarge {
                name,
                size: metadata.len() as usize,
                max: self.max_bytes,
            });
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| ValidationError::Io {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        self.add(
            ImageFile {
                name,
                mime_type: mime_type.to_string(),
                bytes,
            },
            source,
        )
    }

    pub fn remove(&mut self, index: usize) -> Result<ReferenceImage, ValidationError> {
        if index >= self.staged.len() {
            return Err(ValidationError::NoSuchAttachment(index));
        }
        let removed = self.staged.remove(index);
        let _ = self.events.send(AttachmentEvent::Removed { index });
        Ok(removed)
    }

    /// 取走当前全部暂存图片并清空暂存区
    pub fn drain_for_submission(&mut self) -> Vec<ReferenceImage> {
        let drained = std::mem::take(&mut self.staged);
        if !drained.is_empty() {
            let _ = self.events.send(AttachmentEvent::Cleared);
        }
        drained
    }

    pub fn clear(&mut self) {
        self.drain_for_submission();
    }
}

impl Default for AttachmentManager {
    fn default() -> Self {
        Self::from_config(&AttachmentsSection::default())
    }
}
