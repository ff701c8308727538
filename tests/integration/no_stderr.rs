// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use crate::{get_cmd_output, solar_model, Deployment};

#[test]
fn test_static_layers_no_stderr() {
    let deployment = Deployment::new();
    let cmd = solar_model().args(deployment.args("static-layers")).ok();
    assert!(
        cmd.is_ok(),
        "static-layers failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_estimate_no_stderr() {
    let deployment = Deployment::new();
    let mut args = deployment.args("estimate");
    args.extend(["--hardware".to_string(), "gpu".to_string()]);
    let cmd = solar_model().args(&args).ok();
    assert!(
        cmd.is_ok(),
        "estimate failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}
