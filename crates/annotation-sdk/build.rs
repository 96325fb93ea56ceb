//! 编译期生成 GIT_SHA、BUILD_TIMESTAMP 等元信息（供 version.rs 使用）
//!
//! 不在 git 仓库中构建时 vergen 会输出占位值，构建不会失败。

use vergen::EmitBuilder;

fn main() {
    let _ = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit();
}
