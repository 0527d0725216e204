use super::*;
use crate::utils::testing::check_tensor_near;

fn t(values: &[f32]) -> Result<Tensor> {
    Tensor::new(values.to_vec(), vec![values.len()])
}

#[test]
fn test_init_creates_zero_moments() -> Result<()> {
    let opt = adam(0.01)?;
    let params = vec![t(&[1.0, 2.0])?, Tensor::scalar(3.0)];
    let state = opt.init(&params)?;
    assert_eq!(state.count, 0);
    assert_eq!(state.slot_names().collect::<Vec<_>>(), vec!["mu", "nu"]);
    assert_eq!(state.slot("mu")?[1], Tensor::scalar(0.0));
    assert_eq!(state.slot("nu")?[0], t(&[0.0, 0.0])?);
    Ok(())
}

#[test]
fn test_first_steps_move_by_learning_rate() -> Result<()> {
    let opt = adam(0.1)?;
    let params = vec![t(&[1.0, 1.0])?];
    let grads = [t(&[3.0, -0.5])?];
    let state = opt.init(&params)?;

    let (u1, state) = opt.update(&grads, state, &params)?;
    // Bias correction makes the first step -lr * sign(g).
    check_tensor_near(&u1[0], &[2], &[-0.1, 0.1], 1e-5);
    check_tensor_near(&state.slot("mu")?[0], &[2], &[0.3, -0.05], 1e-6);
    check_tensor_near(&state.slot("nu")?[0], &[2], &[0.009, 0.00025], 1e-7);

    let (u2, state) = opt.update(&grads, state, &params)?;
    check_tensor_near(&u2[0], &[2], &[-0.1, 0.1], 1e-5);
    assert_eq!(state.count, 2);
    Ok(())
}

#[test]
fn test_adamw_decays_parameters_directly() -> Result<()> {
    let opt = adamw(0.1, 0.5)?;
    let params = vec![t(&[2.0])?];
    let state = opt.init(&params)?;
    let (updates, _) = opt.update(&[t(&[1.0])?], state, &params)?;
    // -lr * (1 + wd * p)
    check_tensor_near(&updates[0], &[1], &[-0.2], 1e-5);
    Ok(())
}

#[test]
fn test_coupled_weight_decay_goes_through_moments() -> Result<()> {
    let opt = Adam::new(AdamConfig::new(0.1).with_weight_decay(0.5))?;
    let params = vec![t(&[2.0])?];
    let state = opt.init(&params)?;
    let (updates, state) = opt.update(&[t(&[0.0])?], state, &params)?;
    // The decay term becomes the gradient, so it is normalized like one.
    check_tensor_near(&updates[0], &[1], &[-0.1], 1e-5);
    check_tensor_near(&state.slot("mu")?[0], &[1], &[0.1], 1e-6);
    Ok(())
}

#[test]
fn test_invalid_configs() {
    assert!(matches!(adam(-0.1), Err(TreexError::InvalidConfig(_))));
    assert!(matches!(
        Adam::new(AdamConfig::new(0.1).with_betas(1.0, 0.999)),
        Err(TreexError::InvalidConfig(_))
    ));
    assert!(matches!(
        Adam::new(AdamConfig::new(0.1).with_eps(0.0)),
        Err(TreexError::InvalidConfig(_))
    ));
    assert!(matches!(adamw(0.1, -1.0), Err(TreexError::InvalidConfig(_))));
}

#[test]
fn test_missing_moments_is_state_error() -> Result<()> {
    let opt = adam(0.1)?;
    let params = [t(&[1.0])?];
    let err = opt
        .update(&[t(&[1.0])?], TransformState::default(), &params)
        .unwrap_err();
    assert!(err.is_state_error());
    Ok(())
}
