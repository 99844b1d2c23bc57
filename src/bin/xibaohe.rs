// 该文件是 Xibaohe （细胞核） 项目的一部分。
// src/bin/xibaohe.rs - 细胞核实例分割命令行程序
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

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use xibaohe::{
  CHECKPOINT_DIR, LABEL_IMAGE_FILE, PREVIEW_IMAGE_FILE, SUMMARY_FILE,
  checkpoint::CheckpointStore,
  config::{self, Device, PipelineConfig},
  input::ImageFileInput,
  model::{OnnxSegmenter, OnnxSegmenterBuilder},
  output::{
    LabelImageOutput, OutputWrapper, PreviewOutput, Render, SummaryOutput,
  },
  pipeline::Pipeline,
};

/// Xibaohe 细胞核实例分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像（单通道或取第一个通道）
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,
  /// 输出目录
  #[arg(value_name = "OUTPUT")]
  pub output: PathBuf,

  /// NMS IoU 阈值
  #[arg(long, default_value_t = config::DEFAULT_THRES_NMS, value_name = "THRESHOLD")]
  pub thres_nms: f32,
  /// 预测分数阈值
  #[arg(long, default_value_t = config::DEFAULT_THRES_PREDICTION, value_name = "THRESHOLD")]
  pub thres_prediction: f32,
  /// 掩码二值化阈值
  #[arg(long, default_value_t = config::DEFAULT_THRES_MASK, value_name = "THRESHOLD")]
  pub thres_mask: f32,
  /// 检测框面积占图块面积的上限
  #[arg(long, default_value_t = config::DEFAULT_THRES_SIZE, value_name = "RATIO")]
  pub thres_size: f32,
  /// 图块边长
  #[arg(long, default_value_t = config::DEFAULT_TILE_SIZE, value_name = "PIXELS")]
  pub tile_size: usize,
  /// ONNX 分割模型路径
  #[arg(long, default_value = "model.onnx", value_name = "MODEL")]
  pub model_path: PathBuf,
  /// 计算设备: cpu | cuda | cuda:N
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: String,
  /// 滑动窗口步长
  #[arg(long, default_value_t = config::DEFAULT_ROLLING_WINDOW, value_name = "PIXELS")]
  pub rolling_window: usize,
  /// 并行处理图块
  #[arg(long)]
  pub parallel: bool,
  /// 不生成预览图
  #[arg(long)]
  pub no_viewer: bool,
  /// 保留已有检查点并跳过对应图块
  #[arg(long)]
  pub resume: bool,
}

impl Args {
  fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      thres_nms: self.thres_nms,
      thres_prediction: self.thres_prediction,
      thres_mask: self.thres_mask,
      thres_size: self.thres_size,
      tile_size: self.tile_size,
      rolling_window: self.rolling_window,
      parallel: self.parallel,
      resume: self.resume,
    }
  }
}

fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("设置 Ctrl-C 处理器失败")?;
  Ok(stop)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入图像: {}", args.input.display());
  info!("输出目录: {}", args.output.display());
  info!("模型文件路径: {}", args.model_path.display());

  let device: Device = args.device.parse()?;
  let device = device.validate(OnnxSegmenter::AVAILABLE_ACCELERATORS)?;
  info!("计算设备: {}", device);
  config::check_artifacts(&args.input, &args.model_path)?;

  let config = args.pipeline_config();
  config.validate()?;

  std::fs::create_dir_all(&args.output)
    .with_context(|| format!("无法创建输出目录 {}", args.output.display()))?;

  let image = ImageFileInput::open(&args.input)
    .with_context(|| format!("无法读取输入图像 {}", args.input.display()))?
    .normalize()?;
  info!("输入图像尺寸: {}x{}", image.height(), image.width());

  let model = OnnxSegmenterBuilder::new(&args.model_path)
    .tile_size(config.tile_size)
    .build()?;
  let store = CheckpointStore::open(args.output.join(CHECKPOINT_DIR))?;
  let stop = install_interrupt_handler()?;

  let pipeline = Pipeline::new(config.clone(), model, store)?.with_stop_flag(stop);
  let result = pipeline.run(&image)?;
  info!(
    "分割完成: {} 个实例, 耗时 {}",
    result.detections.len(),
    result.finished_at - result.started_at
  );

  let mut outputs = vec![
    OutputWrapper::LabelImage(LabelImageOutput::new(args.output.join(LABEL_IMAGE_FILE))),
    OutputWrapper::Summary(SummaryOutput::new(args.output.join(SUMMARY_FILE), config)),
  ];
  if !args.no_viewer {
    outputs.push(OutputWrapper::Preview(PreviewOutput::new(
      args.output.join(PREVIEW_IMAGE_FILE),
    )));
  }
  for output in &outputs {
    output.render_result(&image, &result)?;
  }

  Ok(())
}
