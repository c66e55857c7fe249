// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use annotest_runner::{
    events::RunCriteria,
    pipeline::{RunPipeline, RunState},
    sink::{ConsoleSink, Conclusion},
};
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::runtime::Handle;

const GATE_TIMEOUT: Duration = Duration::from_secs(30);

fn cart_failure() -> annotest_runner::events::TestResult {
    failed_with_trace(
        "cart-total",
        concat!(
            "   at Shop.Cart.Total() in /home/runner/work/shop/src/Cart.cs:line 12\n",
            "   at System.Runtime.Invoke() in /usr/share/dotnet/Runtime.cs:line 40",
        ),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_run() -> Result<()> {
    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new());

    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(passed("cart-empty"));
    pipeline.on_result(cart_failure());
    let completion = pipeline.on_run_complete(&statistics(1, 1)).await;

    let emitted = pipeline.sink().emitted();
    assert_eq!(emitted.len(), 1, "{emitted:?}");
    assert_eq!(emitted[0].file.as_deref(), Some("src/Cart.cs"));
    assert_eq!(emitted[0].start_line, Some(12));
    assert_eq!(emitted[0].title.as_deref(), Some("Shop.Tests.cart-total"));

    let summary = &completion.summary;
    assert!(summary.contains("passed:1 failed:1 skipped:0 total:2"), "{summary}");
    assert!(summary.contains("Fail: **Shop.Tests.cart-total**\n"), "{summary}");
    assert!(summary.contains("- `Shop.Cart.Total` at `src/Cart.cs:12`\n"), "{summary}");
    assert!(
        summary.contains("- `System.Runtime.Invoke` at `/usr/share/dotnet/Runtime.cs:40`\n"),
        "{summary}"
    );
    assert_eq!(std::fs::read_to_string(&env.summary_path)?, *summary);

    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert_eq!(pipeline.state(), RunState::Finished);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_run_with_permalinks() -> Result<()> {
    let mut env = TestEnv::new(GATE_TIMEOUT);
    env.config.server_url = Some("https://github.com".to_owned());
    env.config.repository = Some("octo/shop".to_owned());
    env.config.sha = Some("abc123".to_owned());
    let pipeline = env.pipeline(StubSink::new());

    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(cart_failure());
    let completion = pipeline.on_run_complete(&statistics(0, 1)).await;

    let link = "https://github.com/octo/shop/blob/abc123/src/Cart.cs#L12";
    assert!(
        completion
            .summary
            .contains(&format!("Fail: [**Shop.Tests.cart-total**]({link})\n")),
        "{}",
        completion.summary
    );
    assert!(
        completion
            .summary
            .contains(&format!("- `Shop.Cart.Total` at [src/Cart.cs:12]({link})\n")),
        "{}",
        completion.summary
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_runs_append() -> Result<()> {
    let env = TestEnv::new(GATE_TIMEOUT);

    let mut summaries = Vec::new();
    for (suite, passed_count) in [("Cart.Tests", 1), ("Orders.Tests", 2)] {
        let mut config = env.config.clone();
        config.suite = Some(suite.to_owned());
        let pipeline = RunPipeline::new(config, StubSink::new(), Handle::current());

        pipeline.on_run_start(&RunCriteria::default());
        for idx in 0..passed_count {
            pipeline.on_result(passed(&format!("{suite}-{idx}")));
        }
        let completion = pipeline.on_run_complete(&statistics(passed_count, 0)).await;
        assert_eq!(completion.conclusion, Conclusion::Success);
        summaries.push(completion.summary);
    }

    assert!(summaries[0].contains("<b>unit / Cart.Tests</b>"));
    assert!(summaries[1].contains("<b>unit / Orders.Tests</b>"));
    assert_eq!(
        std::fs::read_to_string(&env.summary_path)?,
        summaries.concat()
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn console_commands() -> Result<()> {
    let env = TestEnv::new(GATE_TIMEOUT);
    let out = SharedBuffer::default();
    let pipeline = env.pipeline(ConsoleSink::new(out.clone(), false));

    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(cart_failure());
    pipeline.on_run_complete(&statistics(0, 1)).await;

    assert_eq!(
        out.contents(),
        concat!(
            "::echo::off\n",
            "::group::test run / unit\n",
            "::error file=src/Cart.cs,line=12,endLine=12,title=Shop.Tests.cart-total::",
            "Assert.Equal() Failure%0A",
            "[Stack Trace]%0A",
            "   at Shop.Cart.Total() in /home/runner/work/shop/src/Cart.cs:line 12%0A",
            "   at System.Runtime.Invoke() in /usr/share/dotnet/Runtime.cs:line 40%0A\n",
            "::endgroup::\n",
        )
    );
    Ok(())
}
