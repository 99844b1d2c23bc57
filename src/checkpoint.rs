// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/checkpoint.rs - 图块检查点存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregatedSet, aggregate};
use crate::filter::{FilteredDetection, TileMask};

mod rle;

const RECORD_PREFIX: &str = "tile-";
const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Error, Debug)]
pub enum CheckpointError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("检查点记录损坏 {path}: {reason}")]
  Corrupt { path: PathBuf, reason: String },
}

/// 游程编码的裁剪掩码
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MaskRecord {
  pub anchor: [usize; 2],
  pub height: usize,
  pub width: usize,
  pub runs: Vec<u32>,
}

impl From<&TileMask> for MaskRecord {
  fn from(mask: &TileMask) -> Self {
    let (height, width) = mask.mask.dim();
    MaskRecord {
      anchor: [mask.anchor.0, mask.anchor.1],
      height,
      width,
      runs: rle::encode(mask.mask.view()),
    }
  }
}

impl MaskRecord {
  fn decode(&self) -> Option<TileMask> {
    rle::decode(&self.runs, self.height, self.width).map(|mask| TileMask {
      anchor: (self.anchor[0], self.anchor[1]),
      mask,
    })
  }
}

/// 单个图块的检查点记录
///
/// 三个列表总是等长且按下标对齐，单个检测与多个检测的存储形状相同。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
  pub scores: Vec<f32>,
  pub boxes: Vec<[f32; 4]>,
  pub masks: Vec<MaskRecord>,
}

impl CheckpointRecord {
  pub fn from_detections(detections: &[FilteredDetection]) -> Self {
    CheckpointRecord {
      scores: detections.iter().map(|d| d.score).collect(),
      boxes: detections.iter().map(|d| d.bbox).collect(),
      masks: detections.iter().map(|d| MaskRecord::from(&d.mask)).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn into_detections(self) -> Result<Vec<FilteredDetection>, String> {
    if self.boxes.len() != self.scores.len() || self.masks.len() != self.scores.len() {
      return Err(format!(
        "列表长度不一致: 分数 {}, 检测框 {}, 掩码 {}",
        self.scores.len(),
        self.boxes.len(),
        self.masks.len()
      ));
    }

    self
      .scores
      .into_iter()
      .zip(self.boxes)
      .zip(self.masks)
      .enumerate()
      .map(|(k, ((score, bbox), mask))| {
        let mask = mask
          .decode()
          .ok_or_else(|| format!("第 {} 个掩码的游程长度与形状不符", k))?;
        Ok(FilteredDetection { bbox, score, mask })
      })
      .collect()
  }
}

/// 以图块序号为键的检查点目录，每个非空图块一个不可变记录
#[derive(Debug, Clone)]
pub struct CheckpointStore {
  directory: PathBuf,
}

impl CheckpointStore {
  pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
    let directory = directory.into();
    fs::create_dir_all(&directory)?;
    debug!("打开检查点目录: {}", directory.display());
    Ok(Self { directory })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn record_path(&self, index: usize) -> PathBuf {
    self
      .directory
      .join(format!("{}{:06}.{}", RECORD_PREFIX, index, RECORD_EXTENSION))
  }

  pub fn contains(&self, index: usize) -> bool {
    self.record_path(index).is_file()
  }

  /// 原子写入一个图块的记录（先写临时文件再重命名）
  pub fn save(&self, index: usize, detections: &[FilteredDetection]) -> Result<(), CheckpointError> {
    let path = self.record_path(index);
    let temp_path = path.with_extension(TEMP_EXTENSION);
    let record = CheckpointRecord::from_detections(detections);

    let written = (|| -> Result<(), CheckpointError> {
      let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
      serde_json::to_writer(&mut writer, &record)?;
      writer.flush()?;
      writer.get_ref().sync_all()?;
      Ok(())
    })();
    if let Err(e) = written {
      let _ = fs::remove_file(&temp_path);
      return Err(e);
    }

    fs::rename(&temp_path, &path).inspect_err(|_| {
      let _ = fs::remove_file(&temp_path);
    })?;
    debug!("写入检查点 {}: {} 个检测", path.display(), record.len());
    Ok(())
  }

  /// 按键排序的记录文件列表，忽略临时文件与无关文件
  pub fn keys(&self) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
    let mut keys = Vec::new();
    for entry in fs::read_dir(&self.directory)? {
      let path = entry?.path();
      if !path.is_file() {
        continue;
      }
      match parse_key(&path) {
        Some(index) => keys.push((index, path)),
        None => debug!("忽略非检查点文件: {}", path.display()),
      }
    }
    keys.sort_by_key(|(index, _)| *index);
    Ok(keys)
  }

  /// 逐个读取记录，每项为一个图块展开后的检测列表
  pub fn iterate(&self) -> Result<Records, CheckpointError> {
    Ok(Records {
      keys: self.keys()?.into_iter(),
    })
  }

  /// 读取全部记录并拼接
  pub fn load_all(&self) -> Result<AggregatedSet, CheckpointError> {
    let set = aggregate(self.iterate()?)?;
    info!("从检查点载入 {} 个检测", set.len());
    Ok(set)
  }

  /// 删除全部记录，返回删除数量
  pub fn clear(&self) -> Result<usize, CheckpointError> {
    let keys = self.keys()?;
    for (_, path) in &keys {
      fs::remove_file(path)?;
    }
    if !keys.is_empty() {
      warn!("清除 {} 个旧检查点记录", keys.len());
    }
    Ok(keys.len())
  }
}

fn parse_key(path: &Path) -> Option<usize> {
  if path.extension()? != RECORD_EXTENSION {
    return None;
  }
  path
    .file_stem()?
    .to_str()?
    .strip_prefix(RECORD_PREFIX)?
    .parse()
    .ok()
}

pub struct Records {
  keys: std::vec::IntoIter<(usize, PathBuf)>,
}

impl Iterator for Records {
  type Item = Result<Vec<FilteredDetection>, CheckpointError>;

  fn next(&mut self) -> Option<Self::Item> {
    let (_, path) = self.keys.next()?;
    Some(read_record(&path))
  }
}

fn read_record(path: &Path) -> Result<Vec<FilteredDetection>, CheckpointError> {
  let bytes = fs::read(path)?;
  let record: CheckpointRecord =
    serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;
  record
    .into_detections()
    .map_err(|reason| CheckpointError::Corrupt {
      path: path.to_path_buf(),
      reason,
    })
}
