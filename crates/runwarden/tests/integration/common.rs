use anyhow::Result;
use camino::Utf8PathBuf;
use std::{env::current_dir, sync::LazyLock};

use assert_cmd::{Command, cargo};

static TEST_PREFIX: LazyLock<Utf8PathBuf> = LazyLock::new(|| {
    let current_dir = current_dir().expect("Cannot figure out current directory");

    let file_path = current_dir
        .join("tests")
        .join("integration")
        .join("test-data");

    if !file_path.exists() {
        panic!("Cannot find test data directory: {}", file_path.display());
    }

    Utf8PathBuf::try_from(file_path).expect("Cannot create UTF-8 path from test data directory")
});

pub fn input_under_test(name: &str) -> String {
    let file_path = TEST_PREFIX.join(name);

    if !file_path.exists() {
        panic!("Cannot find input under test: {file_path}");
    }

    file_path.to_string()
}

pub enum OutputMode {
    Stdout,
    Stderr,
}

pub struct Runwarden {
    cmd: Command,
    offline: bool,
    inputs: Vec<String>,
    config: Option<String>,
    no_config: bool,
    output: OutputMode,
    expected_code: i32,
}

impl Runwarden {
    /// Create a new `runwarden <subcommand>` runner.
    pub fn new(subcommand: &str) -> Self {
        let mut cmd = Command::new(cargo::cargo_bin!());

        // Start from a clean environment, so that things like `GH_TOKEN`
        // or `RUST_LOG` don't leak into the tests.
        cmd.env_clear();
        cmd.arg(subcommand);

        Self {
            cmd,
            // Only `scan` understands `--offline`.
            offline: subcommand == "scan",
            inputs: vec![],
            config: None,
            no_config: false,
            output: OutputMode::Stdout,
            expected_code: 0,
        }
    }

    pub fn args<'a>(mut self, args: impl IntoIterator<Item = &'a str>) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn no_config(mut self, flag: bool) -> Self {
        self.no_config = flag;
        self
    }

    pub fn offline(mut self, flag: bool) -> Self {
        self.offline = flag;
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn expected_code(mut self, code: i32) -> Self {
        self.expected_code = code;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.cmd.current_dir(dir.into());
        self
    }

    pub fn run(mut self) -> Result<String> {
        if self.offline {
            self.cmd.arg("--offline");
        }

        if self.no_config && self.config.is_some() {
            anyhow::bail!("API misuse: cannot set both --no-config and --config");
        }

        if self.no_config {
            self.cmd.arg("--no-config");
        }

        if let Some(config) = &self.config {
            self.cmd.arg("--config").arg(config);
        }

        for input in &self.inputs {
            self.cmd.arg(input);
        }

        let output = self.cmd.output()?;

        let mut raw = String::from_utf8(match self.output {
            OutputMode::Stdout => output.stdout,
            OutputMode::Stderr => output.stderr,
        })?;

        let code = output.status.code();
        if code != Some(self.expected_code) {
            anyhow::bail!(
                "runwarden exited with unexpected code {code:?} (expected {expected}): {raw}",
                expected = self.expected_code
            );
        }

        let config_placeholder = "@@CONFIG@@";
        if let Some(config) = &self.config {
            raw = raw.replace(config, config_placeholder);
        }

        let test_prefix_placeholder = "@@TEST_PREFIX@@";
        raw = raw.replace(TEST_PREFIX.as_str(), test_prefix_placeholder);

        let version_placeholder = "@@VERSION@@";
        raw = raw.replace(env!("CARGO_PKG_VERSION"), version_placeholder);

        Ok(raw)
    }
}

pub fn runwarden() -> Runwarden {
    Runwarden::new("scan")
}

pub fn runwarden_download() -> Runwarden {
    Runwarden::new("download")
}
