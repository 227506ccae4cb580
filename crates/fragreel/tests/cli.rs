use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fragreel(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fragreel"))
        .env("FRAGREEL_CONFIG_DIR", config_dir)
        .env_remove("FRAGREEL_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run fragreel")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn list_prints_sorted_shader_files() {
    let root = TempDir::new().unwrap();
    let shaders = root.path().join("shaders");
    fs::create_dir_all(&shaders).unwrap();
    fs::write(shaders.join("tunnel.txt"), "void main() {}").unwrap();
    fs::write(shaders.join("Plasma.TXT"), "void main() {}").unwrap();
    fs::write(shaders.join("readme.md"), "ignored").unwrap();

    let output = fragreel(
        &root.path().join("config"),
        &["list", "--shader-dir", shaders.to_str().unwrap()],
    );
    assert!(output.status.success());

    let text = stdout(&output);
    let plasma = text.find("Plasma.TXT").expect("Plasma.TXT listed");
    let tunnel = text.find("tunnel.txt").expect("tunnel.txt listed");
    assert!(plasma < tunnel);
    assert!(!text.contains("readme.md"));
}

#[test]
fn list_falls_back_to_builtin_shader() {
    let root = TempDir::new().unwrap();
    let output = fragreel(
        &root.path().join("config"),
        &[
            "list",
            "--shader-dir",
            root.path().join("absent").to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    assert!(stdout(&output).contains("Fallback Shader"));
}

#[test]
fn config_file_in_config_dir_sets_shader_dir() {
    let root = TempDir::new().unwrap();
    let config_dir = root.path().join("config");
    let shaders = root.path().join("from-config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(&shaders).unwrap();
    fs::write(shaders.join("waves.txt"), "void main() {}").unwrap();
    fs::write(
        config_dir.join("config.toml"),
        format!(
            "shader_dir = {:?}\n[render]\nframes = 90\n",
            shaders.to_str().unwrap()
        ),
    )
    .unwrap();

    let output = fragreel(&config_dir, &["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("waves.txt"));
}

#[test]
fn explicit_config_flag_and_cli_precedence() {
    let root = TempDir::new().unwrap();
    let from_file = root.path().join("from-file");
    let from_flag = root.path().join("from-flag");
    fs::create_dir_all(&from_file).unwrap();
    fs::create_dir_all(&from_flag).unwrap();
    fs::write(from_file.join("file.txt"), "void main() {}").unwrap();
    fs::write(from_flag.join("flag.txt"), "void main() {}").unwrap();
    let config = root.path().join("custom.toml");
    fs::write(
        &config,
        format!("shader_dir = {:?}\n", from_file.to_str().unwrap()),
    )
    .unwrap();

    let output = fragreel(
        &root.path().join("config"),
        &["list", "--config", config.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert!(stdout(&output).contains("file.txt"));

    let output = fragreel(
        &root.path().join("config"),
        &[
            "list",
            "--config",
            config.to_str().unwrap(),
            "--shader-dir",
            from_flag.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("flag.txt"));
    assert!(!text.contains("file.txt"));
}

#[test]
fn invalid_config_is_reported() {
    let root = TempDir::new().unwrap();
    let config_dir = root.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "[render]\nframes = \"many\"\n").unwrap();

    let output = fragreel(&config_dir, &["list"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to parse settings file"));

    let output = fragreel(
        &config_dir,
        &["list", "--config", root.path().join("missing.toml").to_str().unwrap()],
    );
    assert!(!output.status.success());
}
