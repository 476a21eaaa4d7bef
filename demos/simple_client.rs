use gearman_client::BlockingClient;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BlockingClient::new()?;
    client.add_servers("127.0.0.1:4730")?;
    client.set_timeout(Duration::from_secs(30));

    println!("Submitting reverse job...");
    match client.do_job("reverse", b"Hello from Rust!", None) {
        Ok(result) => println!("Result: {}", String::from_utf8_lossy(&result)),
        Err(e) => eprintln!("Job failed: {}", e),
    }

    let handle = client.do_background("echo", b"fire and forget", None)?;
    println!("Background job queued as {}", handle);

    let status = client.job_status(&handle)?;
    println!(
        "known={} running={} progress={}/{}",
        status.is_known, status.is_running, status.numerator, status.denominator
    );

    Ok(())
}
