// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! End-to-end runs of the host-local-admin binary against a disk store.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use host_local_ipam::config::IpamConfig;

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("mynet.json");
    let config = format!(
        r#"{{
            "name": "mynet",
            "ranges": [[{{ "subnet": "10.0.0.0/29" }}]],
            "store": {{ "type": "disk", "dataDir": {:?} }}
        }}"#,
        dir.join("data")
    );
    fs::write(&path, config).unwrap();
    path
}

fn admin(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_host-local-admin"))
        .args(args)
        .args(["--stderr", "false"])
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn should_show_and_collect_reservations() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path());
    let config = IpamConfig::load(&config_path).unwrap();
    let allocators = config.allocators().unwrap();
    for owner in ["alive", "dead"] {
        allocators[0].get(owner, "eth0", None).unwrap();
    }
    let config_arg = config_path.to_str().unwrap();

    let output = admin(&["show", "--config", config_arg]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output),
        "network mynet\n\
         range set mynet/0: 10.0.0.0/29 [10.0.0.1-10.0.0.6] (cursor 10.0.0.3)\n\
         10.0.0.2\talive\teth0\n\
         10.0.0.3\tdead\teth0\n"
    );

    // Refuses to release everything by accident.
    let output = admin(&["gc", "--config", config_arg]);
    assert!(!output.status.success());

    let live_file = dir.path().join("live");
    fs::write(&live_file, "# live containers\nalive\n").unwrap();
    let output = admin(&[
        "gc",
        "--config",
        config_arg,
        "--live-file",
        live_file.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output),
        "released 10.0.0.3\tdead\teth0\n1 released, 1 kept\n"
    );

    let output = admin(&["release", "--config", config_arg, "--owner", "alive"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output), "1 released\n");
    assert!(!dir.path().join("data").join("mynet").join("10.0.0.2").exists());
}

#[test]
fn should_fail_on_missing_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let output = admin(&["show", "--config", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}
