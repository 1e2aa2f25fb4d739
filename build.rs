// 构建脚本: 静态链接 FFmpeg 时补齐系统库
//
// 解码 (文件/RTSP/dshow 摄像头) 与 mpeg4 编码都走 ez-ffmpeg 的静态 FFmpeg。
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // 仅在Windows MSVC环境下需要
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        for lib in [
            "libmfx",   // Intel QSV
            "libx264",  // vcpkg ffmpeg 默认带 x264
            "oleaut32", // dshow 摄像头
            "vfw32",
            "strmiids",
            "secur32", // rtsps / https 输入
        ] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
    }
}
