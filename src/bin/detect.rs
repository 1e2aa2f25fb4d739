// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 人员 + 胸牌检测
///
/// 对图片/视频/摄像头/网络流运行人员模型和胸牌模型,
/// 胸牌左上角落在人员框内即视为佩戴, 绘制并保存结果。
use clap::Parser;
use mimalloc::MiMalloc;
use nametag_rs::{pipeline, Args};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("🚀 人员胸牌检测启动");
    info!("📦 人员模型: {}", args.weights1);
    info!("📦 胸牌模型: {}", args.weights2);
    info!("📹 输入来源: {}", args.source);
    info!("{:?}", args);

    if let Err(e) = pipeline::run(&args) {
        error!("❌ {:#}", e);
        return Err(e);
    }
    Ok(())
}
