use javajudge::isolate::{BoxPool, IsolateBox};
use tempfile::TempDir;

use super::test_config;

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_init_and_cleanup() {
    let config = test_config(200);
    let mut sandbox = IsolateBox::init(200, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    assert!(sandbox.path().exists());
    assert!(sandbox.is_initialized());

    sandbox.cleanup().await.expect("Failed to cleanup sandbox");
    assert!(!sandbox.is_initialized());
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_write_and_read_file() {
    let config = test_config(201);
    let mut sandbox = IsolateBox::init(201, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    sandbox
        .write_file("Main.java", b"public class Main {}")
        .await
        .expect("Failed to write file");
    let read_content = sandbox
        .read_file("Main.java")
        .await
        .expect("Failed to read file");
    assert_eq!(read_content, b"public class Main {}");

    assert!(sandbox.read_optional("stdout.txt").await.unwrap().is_none());

    sandbox.cleanup().await.expect("Failed to cleanup");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_copy_classes_in_and_out() {
    let config = test_config(202);
    let mut sandbox = IsolateBox::init(202, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    let host = TempDir::new().unwrap();
    std::fs::create_dir_all(host.path().join("es/ejercicios")).unwrap();
    std::fs::write(host.path().join("es/ejercicios/Saludo.class"), b"\xca\xfe\xba\xbe").unwrap();

    sandbox.copy_in(host.path(), "classes").await.expect("copy in");
    assert_eq!(
        sandbox.read_file("classes/es/ejercicios/Saludo.class").await.unwrap(),
        b"\xca\xfe\xba\xbe"
    );

    let back = TempDir::new().unwrap();
    sandbox.copy_out("classes", back.path()).await.expect("copy out");
    assert!(back.path().join("es/ejercicios/Saludo.class").is_file());

    sandbox.cleanup().await.expect("Failed to cleanup");
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_pool() {
    let config = test_config(210);
    let pool = BoxPool::new(210..212, config.isolate_binary(), config.cgroup);
    assert_eq!(pool.capacity(), 2);

    let mut sandbox1 = pool.acquire().await.expect("Failed to acquire box");
    let mut sandbox2 = pool.acquire().await.expect("Failed to acquire second box");
    assert_ne!(sandbox1.id(), sandbox2.id());
    assert_eq!(pool.available(), 0);

    sandbox1.cleanup().await.expect("Failed to cleanup sandbox1");
    sandbox2.cleanup().await.expect("Failed to cleanup sandbox2");
    drop(sandbox1);
    drop(sandbox2);
    assert_eq!(pool.available(), 2);
}
