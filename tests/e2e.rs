// 该文件是 Xibaohe （细胞核） 项目的一部分。
// tests/e2e.rs - 端到端分割测试
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

mod common;

use common::synthetic_image::{
  BLOB_ORIGIN, BLOB_SIDE, BlobModel, CallStats, CountingModel, blob_image,
};
use ndarray::{Array2, s};
use xibaohe::{
  CHECKPOINT_DIR,
  checkpoint::CheckpointStore,
  config::PipelineConfig,
  filter::{FilteredDetection, TileMask},
  pipeline::{Pipeline, Segmentation},
};

const SIDE: usize = 256;

fn run(config: PipelineConfig, store: CheckpointStore) -> Segmentation {
  Pipeline::new(config, BlobModel, store)
    .unwrap()
    .run(&blob_image(SIDE))
    .unwrap()
}

fn assert_single_blob(result: &Segmentation) {
  let end = (BLOB_ORIGIN + BLOB_SIDE) as f32;
  let start = BLOB_ORIGIN as f32;
  assert_eq!(result.detections.len(), 1);
  assert_eq!(result.detections.boxes[0], [start, start, end, end]);
  assert_eq!(result.detections.scores[0], 0.9);

  assert_eq!(result.canvas.shape(), (SIDE, SIDE));
  let labels = result.canvas.labels();
  let blob = s![
    BLOB_ORIGIN..BLOB_ORIGIN + BLOB_SIDE,
    BLOB_ORIGIN..BLOB_ORIGIN + BLOB_SIDE
  ];
  assert!(labels.slice(blob).iter().all(|&v| v == 1));
  assert_eq!(labels.sum(), (BLOB_SIDE * BLOB_SIDE) as u32);
}

#[test]
fn sequential_run_finds_one_nucleus() {
  let dir = tempfile::tempdir().unwrap();
  let store = CheckpointStore::open(dir.path().join(CHECKPOINT_DIR)).unwrap();
  let result = run(PipelineConfig::default(), store);

  assert_single_blob(&result);
  assert!(result.aggregated > 1);
  assert_eq!(result.report.tiles_scanned, result.report.tiles_total);
  assert!(result.report.records_written > 0);
}

#[test]
fn parallel_run_matches_sequential() {
  let seq_dir = tempfile::tempdir().unwrap();
  let par_dir = tempfile::tempdir().unwrap();
  let sequential = run(
    PipelineConfig::default(),
    CheckpointStore::open(seq_dir.path()).unwrap(),
  );
  let parallel = run(
    PipelineConfig::default().with_parallel(true),
    CheckpointStore::open(par_dir.path()).unwrap(),
  );

  assert_single_blob(&parallel);
  assert_eq!(sequential.canvas, parallel.canvas);
  assert_eq!(sequential.aggregated, parallel.aggregated);
  assert_eq!(sequential.report, parallel.report);
}

#[test]
fn fresh_run_discards_stale_records() {
  let dir = tempfile::tempdir().unwrap();
  let store = CheckpointStore::open(dir.path()).unwrap();
  let stale = FilteredDetection {
    bbox: [10.0, 10.0, 20.0, 20.0],
    score: 0.99,
    mask: TileMask {
      anchor: (0, 0),
      mask: Array2::ones((10, 10)),
    },
  };
  store.save(9_999, &[stale]).unwrap();

  let result = run(PipelineConfig::default(), store);
  assert_single_blob(&result);
  assert_eq!(result.canvas.get(15, 15), 0);
}

#[test]
fn resume_skips_tiles_with_records() {
  let dir = tempfile::tempdir().unwrap();
  let first = run(
    PipelineConfig::default(),
    CheckpointStore::open(dir.path()).unwrap(),
  );

  let stats = CallStats::default();
  let model = CountingModel::new(BlobModel, stats.clone());
  let resumed = Pipeline::new(
    PipelineConfig::default().with_resume(true),
    model,
    CheckpointStore::open(dir.path()).unwrap(),
  )
  .unwrap()
  .run(&blob_image(SIDE))
  .unwrap();

  assert_eq!(resumed.report.tiles_skipped, first.report.records_written);
  assert_eq!(
    stats.calls.load(std::sync::atomic::Ordering::SeqCst),
    first.report.tiles_total - first.report.records_written
  );
  assert_eq!(resumed.canvas, first.canvas);
  assert_eq!(resumed.aggregated, first.aggregated);
}

#[test]
fn tile_larger_than_image_yields_empty_canvas() {
  let dir = tempfile::tempdir().unwrap();
  let result = Pipeline::new(
    PipelineConfig::default().with_tile_size(512),
    BlobModel,
    CheckpointStore::open(dir.path()).unwrap(),
  )
  .unwrap()
  .run(&blob_image(SIDE))
  .unwrap();

  assert_eq!(result.report.tiles_total, 0);
  assert!(result.detections.is_empty());
  assert_eq!(result.canvas.shape(), (SIDE, SIDE));
  assert_eq!(result.canvas.max_label(), 0);
}
