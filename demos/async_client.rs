use gearman_client::{Client, DoEvent, EventKind, Priority, RunState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::new();
    client.add_servers("127.0.0.1:4730,127.0.0.1:4731")?;
    client.set_callback(EventKind::Complete, |task| {
        println!(
            "  {} finished: {}",
            task.handle.as_deref().unwrap_or("-"),
            String::from_utf8_lossy(&task.result)
        );
    });

    println!("Submitting batch of tasks...");
    client.add_task_high("reverse", b"Task 1", None)?;
    client.add_task("reverse", b"Task 2", None)?;
    client.add_task_low("reverse", b"Task 3", None)?;

    while client.run_tasks().await? == RunState::IoWait {
        client.wait().await?;
    }
    let failed = client
        .tasks()
        .iter()
        .filter(|task| !task.is_successful())
        .count();
    println!("Batch done, {} failed", failed);

    println!("Following a single job...");
    let mut call = client
        .do_call("reverse", b"streamed", None, Priority::Normal, false)
        .await?;
    while let Some(event) = call.next_event().await? {
        match event {
            DoEvent::Status { numerator, denominator } => {
                println!("  progress {}/{}", numerator, denominator)
            }
            DoEvent::Complete(result) => println!("  result: {}", String::from_utf8_lossy(&result)),
            other => println!("  {:?}", other),
        }
    }

    Ok(())
}
