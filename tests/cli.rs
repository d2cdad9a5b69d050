use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn gradient(path: &Path) -> Result<()> {
    RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128])).save(path)?;
    Ok(())
}

fn checker(path: &Path) -> Result<()> {
    RgbImage::from_fn(64, 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 { Rgb([250, 20, 20]) } else { Rgb([10, 10, 240]) }
    })
    .save(path)?;
    Ok(())
}

struct Dirs {
    conf: TempDir,
    library: TempDir,
}

#[fixture]
fn dirs() -> Dirs {
    let library = TempDir::new().unwrap();
    gradient(&library.path().join("a.png")).unwrap();
    gradient(&library.path().join("a_copy.png")).unwrap();
    checker(&library.path().join("b.png")).unwrap();
    Dirs { conf: TempDir::new().unwrap(), library }
}

#[rstest]
fn index_then_search(dirs: Dirs) -> Result<()> {
    let conf = dirs.conf.path();
    let library = dirs.library.path();

    cargo_run!("imsimilar", "-c", conf, "index", library)
        .success()
        .stdout(predicate::str::contains("成功 3"))
        .stdout(predicate::str::contains("嵌入: 已跳过"));

    cargo_run!("imsimilar", "-c", conf, "search", library, library.join("a.png"), "--threshold", "90")
        .success()
        .stdout(predicate::str::contains("a_copy.png"))
        .stdout(predicate::str::contains("b.png").not());

    Ok(())
}

#[rstest]
fn search_json_output(dirs: Dirs) -> Result<()> {
    let conf = dirs.conf.path();
    let library = dirs.library.path();

    cargo_run!("imsimilar", "-c", conf, "index", library).success();
    let output = Command::cargo_bin("imsimilar")?
        .arg("-c")
        .arg(conf)
        .arg("search")
        .arg(library)
        .arg(library.join("b.png"))
        .args(["--mode", "pixel", "--threshold", "0", "--output-format", "json"])
        .output()?;
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["id"] != "b.png"));
    Ok(())
}

#[rstest]
fn stats_and_clean(dirs: Dirs) -> Result<()> {
    let conf = dirs.conf.path();
    let library = dirs.library.path();

    cargo_run!("imsimilar", "-c", conf, "index", library).success();
    cargo_run!("imsimilar", "-c", conf, "stats", library, "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"total\": 3"));

    std::fs::remove_file(library.join("b.png"))?;
    cargo_run!("imsimilar", "-c", conf, "clean", library)
        .success()
        .stdout(predicate::str::contains("已清理 1 条失效记录"));

    cargo_run!("imsimilar", "-c", conf, "clean", library, "--all").success();
    cargo_run!("imsimilar", "-c", conf, "stats", library, "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"total\": 0"));

    Ok(())
}

#[rstest]
fn broken_image_is_skipped(dirs: Dirs) -> Result<()> {
    std::fs::write(dirs.library.path().join("broken.jpg"), b"not a jpeg")?;
    cargo_run!("imsimilar", "-c", dirs.conf.path(), "index", dirs.library.path())
        .success()
        .stdout(predicate::str::contains("失败 1"));
    Ok(())
}

#[rstest]
fn show_fingerprint(dirs: Dirs) -> Result<()> {
    cargo_run!("imsimilar", "-c", dirs.conf.path(), "show", dirs.library.path().join("b.png"))
        .success()
        .stdout(predicate::str::is_match("pHash: [0-9a-f]{64}")?)
        .stdout(predicate::str::contains("48 (3,0,0)"));
    Ok(())
}

#[rstest]
fn threshold_out_of_range(dirs: Dirs) -> Result<()> {
    cargo_run!("imsimilar", "-c", dirs.conf.path(), "search", "lib", "q.png", "--threshold", "120")
        .failure();
    Ok(())
}
