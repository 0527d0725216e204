use super::*;
use crate::key_seq::Key;
use crate::tensor::ones;

#[test]
fn test_invalid_rate() {
    assert!(matches!(Dropout::new(1.0), Err(TreexError::InvalidConfig(_))));
    assert!(matches!(Dropout::new(-0.1), Err(TreexError::InvalidConfig(_))));
}

#[test]
fn test_has_no_leaves() -> Result<()> {
    let dropout = Dropout::new(0.5)?.init(0, &ones(&[2, 2]))?;
    assert!(dropout.treedef().is_empty());
    assert!(dropout.is_initialized());
    Ok(())
}

#[test]
fn test_training_without_key_is_state_error() -> Result<()> {
    let dropout = Dropout::new(0.5)?.init(0, &ones(&[2, 2]))?;
    let err = dropout.apply(None, &ones(&[2, 2])).unwrap_err();
    assert!(err.is_state_error());
    Ok(())
}

#[test]
fn test_eval_is_identity() -> Result<()> {
    let dropout = Dropout::new(0.5)?.init(0, &ones(&[2, 2]))?.eval();
    let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2])?;
    assert_eq!(dropout.call(&x)?, x);
    Ok(())
}

#[test]
fn test_zero_rate_needs_no_key() -> Result<()> {
    let dropout = Dropout::new(0.0)?.init(0, &ones(&[3]))?;
    assert_eq!(dropout.call(&ones(&[3]))?, ones(&[3]));
    Ok(())
}

#[test]
fn test_mask_is_scaled_and_keyed() -> Result<()> {
    let dropout = Dropout::new(0.5)?.init(0, &ones(&[1, 64]))?;
    let x = ones(&[1, 64]);
    let (a, _) = dropout.apply(Some(Key::new(1)), &x)?;
    let (b, _) = dropout.apply(Some(Key::new(1)), &x)?;
    let (c, _) = dropout.apply(Some(Key::new(2)), &x)?;
    assert!(a.data().iter().all(|&v| v == 0.0 || v == 2.0));
    assert!(a.data().iter().any(|&v| v == 0.0));
    assert!(a.data().iter().any(|&v| v == 2.0));
    assert_eq!(a, b);
    assert_ne!(a, c);
    Ok(())
}
