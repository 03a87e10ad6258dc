use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::task::LocalSet;
use tokio::time::{sleep, timeout};

use forge_reload::{interact, InteractOptions};

const SETTLE: Duration = Duration::from_millis(400);

fn quiet() -> InteractOptions {
    InteractOptions {
        banner: Some(String::new()),
        exit_message: Some(String::new()),
    }
}

#[tokio::test]
async fn saving_the_script_rebuilds_the_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.forge");
    std::fs::write(&path, "x = 1\n").unwrap();

    let local = LocalSet::new();
    let (mut client, server) = tokio::io::duplex(256);
    let session_path = path.clone();
    let session = local.spawn_local(async move {
        let mut out = Vec::new();
        let code = interact(&session_path, BufReader::new(server), &mut out, &quiet()).await;
        (code, String::from_utf8(out).unwrap())
    });

    let (code, out) = local
        .run_until(async move {
            client.write_all(b"x + 1\n").await.unwrap();
            sleep(SETTLE).await;

            std::fs::write(&path, "x = 2\n").unwrap();
            sleep(SETTLE).await;

            client.write_all(b"x\n").await.unwrap();
            sleep(SETTLE).await;
            drop(client);

            timeout(Duration::from_secs(10), session)
                .await
                .expect("session should end at end of input")
                .unwrap()
        })
        .await;

    assert_eq!(code.unwrap(), 0);
    let (before, after) = out.rsplit_once("Reloading...").expect("a reload happened");
    assert!(before.starts_with(">>> 2\n"), "{}", out);
    assert!(after.contains(">>> 2\n"), "{}", out);
}

#[tokio::test]
async fn a_broken_save_leaves_an_empty_console_until_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.forge");
    std::fs::write(&path, "greeting = \"hi\"\n").unwrap();

    let local = LocalSet::new();
    let (mut client, server) = tokio::io::duplex(256);
    let session_path = path.clone();
    let session = local.spawn_local(async move {
        let mut out = Vec::new();
        let code = interact(&session_path, BufReader::new(server), &mut out, &quiet()).await;
        (code, String::from_utf8(out).unwrap())
    });

    let out = local
        .run_until(async move {
            sleep(SETTLE).await;
            std::fs::write(&path, "greeting = (\n").unwrap();
            sleep(SETTLE).await;
            client.write_all(b"greeting\n").await.unwrap();
            sleep(SETTLE).await;

            std::fs::write(&path, "greeting = \"hello\"\n").unwrap();
            sleep(SETTLE).await;
            client.write_all(b"greeting\n").await.unwrap();
            sleep(SETTLE).await;
            drop(client);

            let (code, out) = timeout(Duration::from_secs(10), session).await.unwrap().unwrap();
            assert_eq!(code.unwrap(), 0);
            out
        })
        .await;

    assert!(out.contains("SyntaxError"), "{}", out);
    assert!(out.contains("Error: Variable 'greeting' not defined"), "{}", out);
    let (_, last) = out.rsplit_once("Reloading...").unwrap();
    assert!(last.contains(">>> \"hello\"\n"), "{}", out);
}

#[tokio::test]
async fn saves_during_a_run_collapse_into_one_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.forge");
    std::fs::write(&path, "sleep(600)\nx = 0\n").unwrap();

    let local = LocalSet::new();
    let (mut client, server) = tokio::io::duplex(256);
    let session_path = path.clone();
    let session = local.spawn_local(async move {
        let mut out = Vec::new();
        let code = interact(&session_path, BufReader::new(server), &mut out, &quiet()).await;
        (code, String::from_utf8(out).unwrap())
    });

    let (code, out) = local
        .run_until(async move {
            // the first run is still sleeping while these land
            sleep(Duration::from_millis(150)).await;
            for n in 1..=3 {
                std::fs::write(&path, format!("sleep(600)\nx = {}\n", n)).unwrap();
                sleep(Duration::from_millis(20)).await;
            }

            // first run ends, the reload runs, then the new prompt appears
            sleep(Duration::from_millis(1500)).await;
            client.write_all(b"x\n").await.unwrap();
            sleep(SETTLE).await;
            drop(client);

            timeout(Duration::from_secs(10), session).await.unwrap().unwrap()
        })
        .await;

    assert_eq!(code.unwrap(), 0);
    assert_eq!(out.matches("Reloading...").count(), 1, "{}", out);
    let (before, after) = out.rsplit_once("Reloading...").unwrap();
    assert_eq!(before.matches(">>> ").count(), 1, "{}", out);
    assert!(after.contains(">>> 3\n"), "{}", out);
}
